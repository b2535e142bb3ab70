//! **taskctx** - Task-driven code context collection
//!
//! Turns a bug, feature or improvement task into a ranked, deduplicated and
//! token-budgeted set of source excerpts. Signals come from the task text,
//! stack traces point at crash sites, definitions and imports are mined from
//! the project, and results are persisted per task with freshness tracking.

/// Command-line interface with clap integration
pub mod cli;

/// Subcommand handlers and terminal rendering
pub mod commands;

/// Shell completion generation
pub mod completion;

/// Collection pipeline, persistence and the tool-call surface
pub mod core {
    /// Request, candidate and result types
    pub mod task;

    /// Domain errors callers match on
    pub mod error;
    pub use error::ContextError;

    /// Keyword, entity and intent extraction from task text
    pub mod signals;

    /// Multi-language stack trace parsing and frame ranking
    pub mod stack_trace;

    /// Definition extractors (tree-sitter for Rust/Python, regex elsewhere)
    pub mod definitions;

    /// Definition search and similar-code discovery
    pub mod patterns;

    /// Import parsing, module resolution and cycle detection (petgraph)
    pub mod dependencies;

    /// Candidate section extraction from every signal source
    pub mod sections;

    /// Weighted relevance scoring with aho-corasick term matching
    pub mod scoring;

    /// Threshold filtering, deduplication, summarization and token budgets
    pub mod budget;

    /// Result cache with TTL and the moka-backed signal memo
    pub mod cache;

    /// End-to-end collection pipeline
    pub mod collector;
    pub use collector::ContextCollector;

    /// Persistence sink (in-memory and JSON-lines)
    pub mod store;
    pub use store::{ContextStore, JsonlStore, MemoryStore};

    /// collect / get / check_freshness / add / update / remove
    pub mod service;
    pub use service::{ContextPatch, ContextService, FreshnessReport, NewContext};
}

/// Language processing - definition extraction per language family
pub mod parsers {
    /// Rust definitions with tree-sitter
    pub mod rust_parser;
    pub use rust_parser::RustDefinitions;

    /// Python definitions with tree-sitter
    pub mod python_parser;
    pub use python_parser::PythonDefinitions;

    /// Line-regex definitions for the remaining languages
    pub mod regex_definitions;
    pub use regex_definitions::RegexDefinitions;
}

/// Infrastructure - configuration, I/O, path safety, walking, logging
pub mod infra {
    /// Layered configuration (taskctx.toml + TASKCTX_* env)
    pub mod config;
    pub use config::{CollectorConfig, Config, init as config_init, load_config};

    /// Size-bounded file reads with memory mapping for large files
    pub mod io;

    /// Root confinement for every path the pipeline touches
    pub mod paths;
    pub use paths::{PathGuard, ResolvedPath};

    /// Gitignore-aware walking with exclude and extension filters
    pub mod walk;
    pub use walk::FileWalker;

    /// tracing-subscriber setup
    pub mod telemetry;
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli, Commands};
pub use core::task::{CodeContext, ContextCollectionResult, TaskAnalysisInput, TaskType};
pub use core::{ContextCollector, ContextError, ContextService};
pub use infra::{Config, FileWalker, load_config};
