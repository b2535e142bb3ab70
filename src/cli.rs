use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::core::task::{ContextKind, TaskType};

/// Shared application context for global flags
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub verbose: u8,    // global -v count
    pub root: Option<PathBuf>,
    pub store: Option<PathBuf>,
}

#[derive(Parser)]
#[command(name = "tctx")]
#[command(
    about = "Collect, rank and budget the source code context relevant to a bug, feature or improvement task"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress spinners and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Project root to scan (overrides collector.root)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Context store file (overrides store.path)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
}

impl Cli {
    pub fn app_context(&self) -> AppContext {
        AppContext {
            quiet: self.quiet,
            no_color: self.no_color,
            verbose: self.verbose,
            root: self.root.clone(),
            store: self.store.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the collection pipeline for a task and persist the result
    Collect(CollectArgs),

    /// List persisted contexts for a task, most relevant first
    Get(GetArgs),

    /// Flag contexts older than the freshness window as stale
    CheckFreshness(GetArgs),

    /// Add a manual context to a task
    Add(AddArgs),

    /// Update fields of a stored context
    Update(UpdateArgs),

    /// Remove a stored context
    Remove(RemoveArgs),

    /// Show the import graph of the project and any cycles
    Deps(DepsArgs),

    /// Initialize a taskctx.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TaskTypeArg {
    Bug,
    Feature,
    Improvement,
}

impl From<TaskTypeArg> for TaskType {
    fn from(arg: TaskTypeArg) -> Self {
        match arg {
            TaskTypeArg::Bug => TaskType::Bug,
            TaskTypeArg::Feature => TaskType::Feature,
            TaskTypeArg::Improvement => TaskType::Improvement,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Snippet,
    FileReference,
    Dependency,
    Pattern,
}

impl From<KindArg> for ContextKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Snippet => ContextKind::Snippet,
            KindArg::FileReference => ContextKind::FileReference,
            KindArg::Dependency => ContextKind::Dependency,
            KindArg::Pattern => ContextKind::Pattern,
        }
    }
}

#[derive(Debug, Parser)]
pub struct CollectArgs {
    /// Read the whole task as JSON from this file instead of flags
    #[arg(long, conflicts_with_all = ["task_id", "title", "description"])]
    pub task_file: Option<PathBuf>,

    /// Task identifier
    #[arg(long)]
    pub task_id: Option<String>,

    /// Task type
    #[arg(long = "type", value_enum)]
    pub task_type: Option<TaskTypeArg>,

    /// Short task title
    #[arg(long)]
    pub title: Option<String>,

    /// Free-form task description (stack traces go here)
    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub current_state: Option<String>,

    #[arg(long)]
    pub desired_state: Option<String>,

    #[arg(long)]
    pub expected: Option<String>,

    #[arg(long)]
    pub actual: Option<String>,

    /// Files known to be involved (repeatable)
    #[arg(long = "file")]
    pub files: Vec<PathBuf>,

    /// Extra keywords (repeatable)
    #[arg(long = "keyword")]
    pub keywords: Vec<String>,

    /// Extra entity names (repeatable)
    #[arg(long = "entity")]
    pub entities: Vec<String>,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct GetArgs {
    /// Task identifier
    pub task_id: String,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// Task identifier
    #[arg(long)]
    pub task_id: String,

    /// Task type
    #[arg(long = "type", value_enum)]
    pub task_type: TaskTypeArg,

    /// Context kind
    #[arg(long, value_enum, default_value = "snippet")]
    pub kind: KindArg,

    /// Context body
    #[arg(long, conflicts_with = "content_file", required_unless_present = "content_file")]
    pub content: Option<String>,

    /// Read the context body from a file
    #[arg(long)]
    pub content_file: Option<PathBuf>,

    /// File the context refers to
    #[arg(long)]
    pub file: Option<PathBuf>,

    #[arg(long)]
    pub start_line: Option<usize>,

    #[arg(long)]
    pub end_line: Option<usize>,

    #[arg(long, default_value = "")]
    pub description: String,

    /// Relevance in [0, 1]
    #[arg(long, default_value = "0.5")]
    pub score: f32,

    /// Keywords (repeatable)
    #[arg(long = "keyword")]
    pub keywords: Vec<String>,

    /// Print the stored context as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct UpdateArgs {
    /// Context id
    pub id: String,

    #[arg(long)]
    pub content: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    /// Relevance in [0, 1]
    #[arg(long)]
    pub score: Option<f32>,

    /// Replace keywords (repeatable)
    #[arg(long = "keyword")]
    pub keywords: Vec<String>,

    /// Mark the context stale
    #[arg(long, conflicts_with = "fresh")]
    pub stale: bool,

    /// Clear the stale flag
    #[arg(long)]
    pub fresh: bool,

    /// Print the updated context as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Context id
    pub id: String,
}

#[derive(Debug, Parser)]
pub struct DepsArgs {
    /// Print the graph as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}
