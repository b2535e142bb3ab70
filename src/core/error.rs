//! Domain errors callers are expected to match on.

/// Errors surfaced by the tool-call surface and the persistence sink
#[derive(Debug, thiserror::Error)]
pub enum ContextError
{
    /// Update or remove targeted an id that is not stored
    #[error("context not found: {id}")]
    NotFound
    {
        id: String,
    },

    /// Request is missing required fields or carries invalid values
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persistence sink failure
    #[error("store error: {0}")]
    Store(String),
}
