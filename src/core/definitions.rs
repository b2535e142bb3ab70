//! Pluggable function/class definition lookup.
//!
//! The pattern matcher only talks to [`DefinitionExtractor`]; Rust and
//! Python files get tree-sitter extractors, everything else the regex one.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::parsers::{
    python_parser::PythonDefinitions, regex_definitions::RegexDefinitions,
    rust_parser::RustDefinitions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind
{
    Function,
    Class,
}

/// A named definition with its 1-based inclusive span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition
{
    pub name: String,
    pub kind: DefinitionKind,
    pub start_line: usize,
    pub end_line: usize,
    /// Method/field/variant names, for classes only
    pub members: Vec<String>,
}

pub trait DefinitionExtractor: Send + Sync
{
    /// All function and class definitions in `content`
    fn definitions(
        &self,
        content: &str,
    ) -> Result<Vec<Definition>>;

    /// Language label for logs
    fn language(&self) -> &'static str;
}

/// One extractor per supported language, routed by extension
pub struct Extractors
{
    rust: RustDefinitions,
    python: PythonDefinitions,
    generic: RegexDefinitions,
}

impl Extractors
{
    pub fn new() -> Result<Self>
    {
        Ok(Self {
            rust: RustDefinitions::new()?,
            python: PythonDefinitions::new()?,
            generic: RegexDefinitions::new()?,
        })
    }

    /// Extractor for `path` by extension
    pub fn for_path(
        &self,
        path: &Path,
    ) -> &dyn DefinitionExtractor
    {
        match path
            .extension()
            .and_then(|e| e.to_str())
        {
            Some("rs") => &self.rust,
            Some("py" | "pyi") => &self.python,
            _ => &self.generic,
        }
    }

    /// Definitions in `content`; if the language extractor fails, the
    /// regex extractor gets a chance before giving up
    pub fn definitions(
        &self,
        path: &Path,
        content: &str,
    ) -> Vec<Definition>
    {
        let primary = self.for_path(path);
        match primary.definitions(content)
        {
            Ok(defs) => defs,
            Err(e) =>
            {
                tracing::debug!(
                    path = %path.display(),
                    language = primary.language(),
                    error = %e,
                    "definition extraction failed, using regex fallback"
                );
                self.generic
                    .definitions(content)
                    .unwrap_or_default()
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn routes_by_extension() -> Result<()>
    {
        let ex = Extractors::new()?;
        assert_eq!(
            ex.for_path(Path::new("src/lib.rs"))
                .language(),
            "rust"
        );
        assert_eq!(
            ex.for_path(Path::new("app/models.py"))
                .language(),
            "python"
        );
        assert_eq!(
            ex.for_path(Path::new("web/user.js"))
                .language(),
            "generic"
        );
        Ok(())
    }
}
