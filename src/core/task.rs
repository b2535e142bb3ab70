//! Request, candidate, and result types shared by every pipeline stage.
//!
//! A collection run takes one [`TaskAnalysisInput`], produces transient
//! [`CodeSection`] candidates, and ends with persisted [`CodeContext`]
//! records wrapped in a [`ContextCollectionResult`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::ContextError;
use crate::core::stack_trace::ParsedStackTrace;

/// Kind of tracked work item driving a collection run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType
{
    Bug,
    Feature,
    Improvement,
}

impl TaskType
{
    /// Stable lowercase label used in records and ids
    pub fn as_str(self) -> &'static str
    {
        match self
        {
            TaskType::Bug => "bug",
            TaskType::Feature => "feature",
            TaskType::Improvement => "improvement",
        }
    }
}

impl std::fmt::Display for TaskType
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result
    {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType
{
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "bug" => Ok(TaskType::Bug),
            "feature" => Ok(TaskType::Feature),
            "improvement" => Ok(TaskType::Improvement),
            other => Err(ContextError::InvalidInput(format!("unknown task type: {other}"))),
        }
    }
}

/// Immutable per-run request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAnalysisInput
{
    /// Identifier of the tracked item
    pub task_id: String,

    /// Bug, feature, or improvement
    pub task_type: TaskType,

    pub title: String,

    pub description: String,

    #[serde(default)]
    pub current_state: Option<String>,

    #[serde(default)]
    pub desired_state: Option<String>,

    #[serde(default)]
    pub expected_behavior: Option<String>,

    #[serde(default)]
    pub actual_behavior: Option<String>,

    /// Files the reporter explicitly named (root-relative or absolute)
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Caller-supplied keywords merged ahead of derived ones
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Caller-supplied entity names merged ahead of derived ones
    #[serde(default)]
    pub entities: Vec<String>,
}

impl TaskAnalysisInput
{
    /// Minimal request with only the required fields
    pub fn new(
        task_id: impl Into<String>,
        task_type: TaskType,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self
    {
        Self {
            task_id: task_id.into(),
            task_type,
            title: title.into(),
            description: description.into(),
            current_state: None,
            desired_state: None,
            expected_behavior: None,
            actual_behavior: None,
            files: Vec::new(),
            keywords: Vec::new(),
            entities: Vec::new(),
        }
    }

    /// Reject requests without a task id, or with neither a title nor a
    /// description. Either text field alone is enough.
    pub fn validate(&self) -> Result<(), ContextError>
    {
        if self
            .task_id
            .trim()
            .is_empty()
        {
            return Err(ContextError::InvalidInput("task_id is required".into()));
        }
        if self
            .title
            .trim()
            .is_empty()
            && self
                .description
                .trim()
                .is_empty()
        {
            return Err(ContextError::InvalidInput(
                "title or description must be non-empty".into(),
            ));
        }
        Ok(())
    }

    /// Concatenate every non-empty text field, one per line
    pub fn combined_text(&self) -> String
    {
        let optional = [
            &self.current_state,
            &self.desired_state,
            &self.expected_behavior,
            &self.actual_behavior,
        ];

        std::iter::once(self.title.as_str())
            .chain(std::iter::once(
                self.description
                    .as_str(),
            ))
            .chain(
                optional
                    .into_iter()
                    .filter_map(|o| o.as_deref()),
            )
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Category of a candidate section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind
{
    Function,
    Class,
    Import,
    Usage,
    Comment,
}

impl SectionKind
{
    pub fn as_str(self) -> &'static str
    {
        match self
        {
            SectionKind::Function => "function",
            SectionKind::Class => "class",
            SectionKind::Import => "import",
            SectionKind::Usage => "usage",
            SectionKind::Comment => "comment",
        }
    }
}

impl std::fmt::Display for SectionKind
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result
    {
        f.write_str(self.as_str())
    }
}

/// Transient candidate excerpt produced by the section extractor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeSection
{
    /// Root-relative file path
    pub file_path: PathBuf,

    /// 1-based inclusive start line
    pub start_line: usize,

    /// 1-based inclusive end line
    pub end_line: usize,

    pub content: String,

    /// Interim score before scoring, final score after
    pub score: f32,

    pub kind: SectionKind,

    /// Entity names that caused this section to be picked
    pub related_entities: Vec<String>,
}

impl CodeSection
{
    /// Human-readable line label ("L12" or "L12-40")
    pub fn line_label(&self) -> String
    {
        if self.start_line == self.end_line
        {
            format!("L{}", self.start_line)
        }
        else
        {
            format!("L{}-{}", self.start_line, self.end_line)
        }
    }
}

/// Kind of persisted context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind
{
    Snippet,
    FileReference,
    Dependency,
    Pattern,
}

impl ContextKind
{
    pub fn as_str(self) -> &'static str
    {
        match self
        {
            ContextKind::Snippet => "snippet",
            ContextKind::FileReference => "file_reference",
            ContextKind::Dependency => "dependency",
            ContextKind::Pattern => "pattern",
        }
    }
}

impl From<SectionKind> for ContextKind
{
    fn from(kind: SectionKind) -> Self
    {
        match kind
        {
            SectionKind::Import => ContextKind::Dependency,
            SectionKind::Function | SectionKind::Class | SectionKind::Usage | SectionKind::Comment =>
            {
                ContextKind::Snippet
            }
        }
    }
}

impl std::str::FromStr for ContextKind
{
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "snippet" => Ok(ContextKind::Snippet),
            "file_reference" | "file-reference" | "file" => Ok(ContextKind::FileReference),
            "dependency" => Ok(ContextKind::Dependency),
            "pattern" => Ok(ContextKind::Pattern),
            other => Err(ContextError::InvalidInput(format!("unknown context kind: {other}"))),
        }
    }
}

/// Whether a context came from a collection run or a manual add
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource
{
    Collected,
    Manual,
}

impl ContextSource
{
    pub fn as_str(self) -> &'static str
    {
        match self
        {
            ContextSource::Collected => "collected",
            ContextSource::Manual => "manual",
        }
    }
}

/// Persisted, scored excerpt or reference attached to a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeContext
{
    pub id: String,
    pub task_id: String,
    pub task_type: TaskType,
    pub kind: ContextKind,
    pub source: ContextSource,
    pub file_path: Option<PathBuf>,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub content: String,
    pub description: String,
    /// Always within [0, 1]
    pub relevance_score: f32,
    pub keywords: Vec<String>,
    pub collected_at: DateTime<Utc>,
    pub last_checked_at: DateTime<Utc>,
    pub is_stale: bool,
}

impl CodeContext
{
    /// Basename of the referenced file, if any
    pub fn file_name(&self) -> Option<&str>
    {
        self.file_path
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
    }
}

/// Counts and timings describing one collection run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary
{
    pub total_contexts: usize,
    /// Contexts scoring at least 0.7
    pub high_relevance: usize,
    /// Contexts scoring in [0.4, 0.7)
    pub medium_relevance: usize,
    /// Contexts scoring below 0.4
    pub low_relevance: usize,
    pub average_score: f32,
    pub processing_time_ms: u64,
    /// Distinct files touched by the returned contexts
    pub files_analyzed: usize,
    pub patterns_found: usize,
    pub dependencies_found: usize,
    pub stack_traces_found: usize,
}

/// Band thresholds used by summaries and recommendations
pub const HIGH_RELEVANCE: f32 = 0.7;
pub const MEDIUM_RELEVANCE: f32 = 0.4;

impl CollectionSummary
{
    /// Fill the relevance-band counts and average from `contexts`
    pub fn from_contexts(contexts: &[CodeContext]) -> Self
    {
        let mut s = Self {
            total_contexts: contexts.len(),
            ..Default::default()
        };

        for c in contexts
        {
            if c.relevance_score >= HIGH_RELEVANCE
            {
                s.high_relevance += 1;
            }
            else if c.relevance_score >= MEDIUM_RELEVANCE
            {
                s.medium_relevance += 1;
            }
            else
            {
                s.low_relevance += 1;
            }
        }

        if !contexts.is_empty()
        {
            let total: f32 = contexts
                .iter()
                .map(|c| c.relevance_score)
                .sum();
            s.average_score = total / contexts.len() as f32;
        }

        s.files_analyzed = contexts
            .iter()
            .filter_map(|c| {
                c.file_path
                    .as_ref()
            })
            .collect::<std::collections::HashSet<_>>()
            .len();

        s
    }
}

/// Response contract of a collection run
#[derive(Debug, Clone, Serialize)]
pub struct ContextCollectionResult
{
    pub contexts: Vec<CodeContext>,
    pub summary: CollectionSummary,
    pub recommendations: Vec<String>,
    pub potential_issues: Vec<String>,
    /// Only populated for bug tasks with detected traces
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stack_traces: Vec<ParsedStackTrace>,
    /// True when served from the result cache
    pub from_cache: bool,
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn combined_text_skips_empty_fields()
    {
        let mut input = TaskAnalysisInput::new("T-1", TaskType::Bug, "Crash on save", "  ");
        input.actual_behavior = Some("App exits".into());
        input.expected_behavior = Some(String::new());

        assert_eq!(input.combined_text(), "Crash on save\nApp exits");
    }

    #[test]
    fn validate_requires_task_id()
    {
        let input = TaskAnalysisInput::new(" ", TaskType::Feature, "Add export", "");
        assert!(matches!(input.validate(), Err(ContextError::InvalidInput(_))));
    }

    #[test]
    fn validate_needs_one_text_field()
    {
        let title_only = TaskAnalysisInput::new("T-1", TaskType::Bug, "Crash on save", "");
        assert!(title_only.validate().is_ok());

        let description_only = TaskAnalysisInput::new("T-1", TaskType::Bug, " ", "App exits on save");
        assert!(description_only.validate().is_ok());

        let neither = TaskAnalysisInput::new("T-1", TaskType::Bug, " ", "\n");
        assert!(matches!(neither.validate(), Err(ContextError::InvalidInput(_))));
    }

    #[test]
    fn section_kind_maps_to_context_kind()
    {
        assert_eq!(ContextKind::from(SectionKind::Import), ContextKind::Dependency);
        assert_eq!(ContextKind::from(SectionKind::Comment), ContextKind::Snippet);
        assert_eq!(ContextKind::from(SectionKind::Class), ContextKind::Snippet);
    }

    #[test]
    fn task_type_parses_case_insensitively()
    {
        assert_eq!("Bug".parse::<TaskType>().unwrap(), TaskType::Bug);
        assert!("epic".parse::<TaskType>().is_err());
    }
}
