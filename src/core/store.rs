//! Persistence sink for collected and manual contexts.
//!
//! Each [`CodeContext`] maps one-to-one onto a flat [`ContextRecord`]:
//! keywords as a JSON-encoded array string, booleans as 0/1, timestamps as
//! RFC 3339 strings. [`JsonlStore`] keeps one record per line and rewrites
//! the file atomically; [`MemoryStore`] backs tests and embedding callers.

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::ContextError;
use crate::core::task::{CodeContext, ContextKind, ContextSource, TaskType};

/// Flat row form of a [`CodeContext`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord
{
    pub id: String,
    pub task_id: String,
    pub task_type: String,
    pub context_type: String,
    pub source: String,
    pub file_path: Option<String>,
    pub start_line: Option<u64>,
    pub end_line: Option<u64>,
    pub content: String,
    pub description: String,
    pub relevance_score: f64,
    /// JSON-encoded array of strings
    pub keywords: String,
    pub collected_at: String,
    pub last_checked_at: String,
    /// 0 or 1
    pub is_stale: u8,
}

impl From<&CodeContext> for ContextRecord
{
    fn from(c: &CodeContext) -> Self
    {
        Self {
            id: c
                .id
                .clone(),
            task_id: c
                .task_id
                .clone(),
            task_type: c
                .task_type
                .as_str()
                .to_string(),
            context_type: c
                .kind
                .as_str()
                .to_string(),
            source: c
                .source
                .as_str()
                .to_string(),
            file_path: c
                .file_path
                .as_ref()
                .map(|p| {
                    p.to_string_lossy()
                        .replace('\\', "/")
                }),
            start_line: c
                .start_line
                .map(|l| l as u64),
            end_line: c
                .end_line
                .map(|l| l as u64),
            content: c
                .content
                .clone(),
            description: c
                .description
                .clone(),
            relevance_score: f64::from(c.relevance_score),
            // A Vec<String> always serializes
            keywords: serde_json::to_string(&c.keywords).unwrap_or_else(|_| "[]".to_string()),
            collected_at: c
                .collected_at
                .to_rfc3339(),
            last_checked_at: c
                .last_checked_at
                .to_rfc3339(),
            is_stale: u8::from(c.is_stale),
        }
    }
}

fn parse_time(
    field: &str,
    value: &str,
) -> Result<DateTime<Utc>, ContextError>
{
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ContextError::Store(format!("bad {field} timestamp {value:?}: {e}")))
}

impl TryFrom<ContextRecord> for CodeContext
{
    type Error = ContextError;

    fn try_from(r: ContextRecord) -> Result<Self, Self::Error>
    {
        let task_type: TaskType = r
            .task_type
            .parse()?;
        let kind: ContextKind = r
            .context_type
            .parse()?;
        let source = match r
            .source
            .as_str()
        {
            "manual" => ContextSource::Manual,
            "collected" => ContextSource::Collected,
            other => return Err(ContextError::Store(format!("unknown context source: {other}"))),
        };
        let keywords: Vec<String> = serde_json::from_str(&r.keywords)
            .map_err(|e| ContextError::Store(format!("bad keywords for {}: {e}", r.id)))?;

        Ok(CodeContext {
            collected_at: parse_time("collected_at", &r.collected_at)?,
            last_checked_at: parse_time("last_checked_at", &r.last_checked_at)?,
            id: r.id,
            task_id: r.task_id,
            task_type,
            kind,
            source,
            file_path: r
                .file_path
                .map(PathBuf::from),
            start_line: r
                .start_line
                .map(|l| l as usize),
            end_line: r
                .end_line
                .map(|l| l as usize),
            content: r.content,
            description: r.description,
            relevance_score: (r.relevance_score as f32).clamp(0.0, 1.0),
            keywords,
            is_stale: r.is_stale != 0,
        })
    }
}

/// Storage sink behind the tool-call surface
pub trait ContextStore: Send + Sync
{
    /// Contexts of one task, most relevant first
    fn list_for_task(
        &self,
        task_id: &str,
    ) -> Result<Vec<CodeContext>>;

    fn get(
        &self,
        id: &str,
    ) -> Result<Option<CodeContext>>;

    /// Insert or replace by id
    fn upsert_all(
        &self,
        contexts: &[CodeContext],
    ) -> Result<()>;

    /// Replace the collected contexts of `task_id`; manual ones are kept
    fn replace_collected(
        &self,
        task_id: &str,
        contexts: &[CodeContext],
    ) -> Result<()>;

    /// Delete by id; false when the id is unknown
    fn remove(
        &self,
        id: &str,
    ) -> Result<bool>;
}

fn sorted_by_relevance(mut v: Vec<CodeContext>) -> Vec<CodeContext>
{
    v.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then_with(|| a.id.cmp(&b.id))
    });
    v
}

type Table = IndexMap<String, CodeContext>;

fn apply_replace(
    table: &mut Table,
    task_id: &str,
    contexts: &[CodeContext],
)
{
    table.retain(|_, c| !(c.task_id == task_id && c.source == ContextSource::Collected));
    for c in contexts
    {
        table.insert(c.id.clone(), c.clone());
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore
{
    table: Mutex<Table>,
}

impl MemoryStore
{
    pub fn new() -> Self
    {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table>
    {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContextStore for MemoryStore
{
    fn list_for_task(
        &self,
        task_id: &str,
    ) -> Result<Vec<CodeContext>>
    {
        let rows = self
            .lock()
            .values()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect();
        Ok(sorted_by_relevance(rows))
    }

    fn get(
        &self,
        id: &str,
    ) -> Result<Option<CodeContext>>
    {
        Ok(self
            .lock()
            .get(id)
            .cloned())
    }

    fn upsert_all(
        &self,
        contexts: &[CodeContext],
    ) -> Result<()>
    {
        let mut table = self.lock();
        for c in contexts
        {
            table.insert(c.id.clone(), c.clone());
        }
        Ok(())
    }

    fn replace_collected(
        &self,
        task_id: &str,
        contexts: &[CodeContext],
    ) -> Result<()>
    {
        apply_replace(&mut self.lock(), task_id, contexts);
        Ok(())
    }

    fn remove(
        &self,
        id: &str,
    ) -> Result<bool>
    {
        Ok(self
            .lock()
            .shift_remove(id)
            .is_some())
    }
}

/// JSON-lines file store. Every mutation loads the table, applies the
/// change, and atomically replaces the file.
#[derive(Debug)]
pub struct JsonlStore
{
    path: PathBuf,
    /// Serializes read-modify-write cycles within the process
    write_lock: Mutex<()>,
}

impl JsonlStore
{
    pub fn new(path: impl Into<PathBuf>) -> Self
    {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// All rows; a missing file is an empty store. Undecodable lines are
    /// skipped with a warning.
    fn load(&self) -> Result<Table>
    {
        let file = match fs::File::open(&self.path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Table::new()),
            Err(e) =>
            {
                return Err(e).with_context(|| format!("Failed to open {}", self.path.display()));
            }
        };

        let mut table = Table::new();
        for (idx, line) in BufReader::new(file)
            .lines()
            .enumerate()
        {
            let line = line.with_context(|| format!("Failed to read {}", self.path.display()))?;
            if line
                .trim()
                .is_empty()
            {
                continue;
            }

            let decoded = serde_json::from_str::<ContextRecord>(&line)
                .map_err(|e| ContextError::Store(e.to_string()))
                .and_then(CodeContext::try_from);
            match decoded
            {
                Ok(ctx) =>
                {
                    table.insert(ctx.id.clone(), ctx);
                }
                Err(e) => warn!(line = idx + 1, error = %e, "skipping undecodable context record"),
            }
        }
        Ok(table)
    }

    fn write_atomic(
        &self,
        table: &Table,
    ) -> Result<()>
    {
        let dir = match self
            .path
            .parent()
        {
            Some(p) if !p
                .as_os_str()
                .is_empty() =>
            {
                p.to_path_buf()
            }
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create directory {}", dir.display()))?;

        let tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            for ctx in table.values()
            {
                let json = serde_json::to_string(&ContextRecord::from(ctx)).context("Failed to serialize context")?;
                writer
                    .write_all(json.as_bytes())
                    .context("Failed to write context")?;
                writer
                    .write_all(b"\n")
                    .context("Failed to write newline")?;
            }
            writer
                .flush()
                .context("Failed to flush store")?;
        }
        tmp.as_file()
            .sync_all()
            .context("Failed to sync store")?;

        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        debug!(path = %self.path.display(), rows = table.len(), "store written");
        Ok(())
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Table) -> T,
    ) -> Result<T>
    {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut table = self.load()?;
        let out = f(&mut table);
        self.write_atomic(&table)?;
        Ok(out)
    }
}

impl ContextStore for JsonlStore
{
    fn list_for_task(
        &self,
        task_id: &str,
    ) -> Result<Vec<CodeContext>>
    {
        let rows = self
            .load()?
            .into_values()
            .filter(|c| c.task_id == task_id)
            .collect();
        Ok(sorted_by_relevance(rows))
    }

    fn get(
        &self,
        id: &str,
    ) -> Result<Option<CodeContext>>
    {
        Ok(self
            .load()?
            .shift_remove(id))
    }

    fn upsert_all(
        &self,
        contexts: &[CodeContext],
    ) -> Result<()>
    {
        self.mutate(|table| {
            for c in contexts
            {
                table.insert(c.id.clone(), c.clone());
            }
        })
    }

    fn replace_collected(
        &self,
        task_id: &str,
        contexts: &[CodeContext],
    ) -> Result<()>
    {
        self.mutate(|table| apply_replace(table, task_id, contexts))
    }

    fn remove(
        &self,
        id: &str,
    ) -> Result<bool>
    {
        self.mutate(|table| {
            table
                .shift_remove(id)
                .is_some()
        })
    }
}
