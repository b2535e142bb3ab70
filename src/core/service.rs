//! Tool-call surface: collect, get, check_freshness, add, update, remove.
//!
//! Errors a caller must distinguish (unknown id, invalid input) are
//! [`ContextError`]s inside the returned `anyhow::Error`; use
//! `downcast_ref::<ContextError>()` to match on them.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use xxhash_rust::xxh64::Xxh64;

use crate::core::collector::ContextCollector;
use crate::core::error::ContextError;
use crate::core::store::ContextStore;
use crate::core::task::{
    CodeContext, ContextCollectionResult, ContextKind, ContextSource, TaskAnalysisInput, TaskType,
};

/// A manually supplied context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContext
{
    pub task_id: String,
    pub task_type: TaskType,
    #[serde(default = "default_kind")]
    pub kind: ContextKind,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub start_line: Option<usize>,
    #[serde(default)]
    pub end_line: Option<usize>,
    pub content: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_manual_score")]
    pub relevance_score: f32,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_kind() -> ContextKind
{
    ContextKind::Snippet
}

fn default_manual_score() -> f32
{
    0.5
}

/// Whitelisted fields an update may change; `None` leaves a field as is
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPatch
{
    pub content: Option<String>,
    pub description: Option<String>,
    pub relevance_score: Option<f32>,
    pub keywords: Option<Vec<String>>,
    pub is_stale: Option<bool>,
}

/// Contexts of one task split by age
#[derive(Debug, Clone, Default, Serialize)]
pub struct FreshnessReport
{
    pub fresh: Vec<CodeContext>,
    pub stale: Vec<CodeContext>,
}

fn check_score(score: f32) -> Result<(), ContextError>
{
    if (0.0..=1.0).contains(&score)
    {
        Ok(())
    }
    else
    {
        Err(ContextError::InvalidInput(format!(
            "relevance score must be within [0, 1], got {score}"
        )))
    }
}

/// `{task}_manual_{hash}` over everything identifying the context
fn manual_id(ctx: &NewContext) -> String
{
    let mut h = Xxh64::new(0);
    h.update(
        ctx.task_id
            .as_bytes(),
    );
    h.update(
        ctx.kind
            .as_str()
            .as_bytes(),
    );
    if let Some(p) = &ctx.file_path
    {
        h.update(
            p.to_string_lossy()
                .as_bytes(),
        );
    }
    h.update(&ctx.start_line.unwrap_or(0).to_le_bytes());
    h.update(&ctx.end_line.unwrap_or(0).to_le_bytes());
    h.update(
        ctx.content
            .as_bytes(),
    );
    format!("{}_manual_{:016x}", ctx.task_id, h.digest())
}

pub struct ContextService
{
    collector: ContextCollector,
    store: Box<dyn ContextStore>,
    freshness: Duration,
}

impl ContextService
{
    pub fn new(
        collector: ContextCollector,
        store: Box<dyn ContextStore>,
        freshness_hours: i64,
    ) -> Self
    {
        Self {
            collector,
            store,
            freshness: Duration::hours(freshness_hours.max(0)),
        }
    }

    pub fn collector(&self) -> &ContextCollector
    {
        &self.collector
    }

    pub fn collector_mut(&mut self) -> &mut ContextCollector
    {
        &mut self.collector
    }

    /// Run the pipeline and persist its contexts, replacing earlier
    /// collected ones for the task
    #[instrument(level = "debug", skip_all, fields(task_id = %input.task_id))]
    pub fn collect(
        &self,
        input: &TaskAnalysisInput,
    ) -> Result<ContextCollectionResult>
    {
        let result = self
            .collector
            .collect(input)?;
        self.store
            .replace_collected(&input.task_id, &result.contexts)?;
        debug!(persisted = result.contexts.len(), "contexts persisted");
        Ok(result)
    }

    /// Persisted contexts for a task, most relevant first
    pub fn get(
        &self,
        task_id: &str,
    ) -> Result<Vec<CodeContext>>
    {
        self.store
            .list_for_task(task_id)
    }

    pub fn check_freshness(
        &self,
        task_id: &str,
    ) -> Result<FreshnessReport>
    {
        self.check_freshness_at(task_id, Utc::now())
    }

    /// Flag contexts older than the freshness window (or already flagged)
    /// as stale, stamp every context as checked at `now`, and persist.
    pub fn check_freshness_at(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FreshnessReport>
    {
        let mut contexts = self
            .store
            .list_for_task(task_id)?;
        for c in &mut contexts
        {
            c.is_stale = c.is_stale || now - c.collected_at > self.freshness;
            c.last_checked_at = now;
        }
        self.store
            .upsert_all(&contexts)?;

        let (stale, fresh): (Vec<_>, Vec<_>) = contexts
            .into_iter()
            .partition(|c| c.is_stale);
        debug!(task_id, fresh = fresh.len(), stale = stale.len(), "freshness checked");
        Ok(FreshnessReport { fresh, stale })
    }

    /// Insert a manual context
    pub fn add(
        &self,
        new: NewContext,
    ) -> Result<CodeContext>
    {
        if new
            .task_id
            .trim()
            .is_empty()
        {
            return Err(ContextError::InvalidInput("task_id is required".into()).into());
        }
        if new
            .content
            .trim()
            .is_empty()
        {
            return Err(ContextError::InvalidInput("content is required".into()).into());
        }
        check_score(new.relevance_score)?;

        let now = Utc::now();
        let description = if new
            .description
            .trim()
            .is_empty()
        {
            match &new.file_path
            {
                Some(p) => format!("manual {} for {}", new.kind.as_str(), p.display()),
                None => format!("manual {}", new.kind.as_str()),
            }
        }
        else
        {
            new.description
                .clone()
        };

        let ctx = CodeContext {
            id: manual_id(&new),
            task_id: new.task_id,
            task_type: new.task_type,
            kind: new.kind,
            source: ContextSource::Manual,
            file_path: new.file_path,
            start_line: new.start_line,
            end_line: new.end_line,
            content: new.content,
            description,
            relevance_score: new.relevance_score,
            keywords: new.keywords,
            collected_at: now,
            last_checked_at: now,
            is_stale: false,
        };

        self.store
            .upsert_all(std::slice::from_ref(&ctx))?;
        self.collector
            .invalidate_task(&ctx.task_id);
        info!(id = %ctx.id, "manual context added");
        Ok(ctx)
    }

    /// Patch whitelisted fields; always stamps `last_checked_at`
    pub fn update(
        &self,
        id: &str,
        patch: ContextPatch,
    ) -> Result<CodeContext>
    {
        let mut ctx = self
            .store
            .get(id)?
            .ok_or_else(|| ContextError::NotFound { id: id.to_string() })?;

        if let Some(score) = patch.relevance_score
        {
            check_score(score)?;
            ctx.relevance_score = score;
        }
        if let Some(content) = patch.content
        {
            ctx.content = content;
        }
        if let Some(description) = patch.description
        {
            ctx.description = description;
        }
        if let Some(keywords) = patch.keywords
        {
            ctx.keywords = keywords;
        }
        if let Some(stale) = patch.is_stale
        {
            ctx.is_stale = stale;
        }
        ctx.last_checked_at = Utc::now();

        self.store
            .upsert_all(std::slice::from_ref(&ctx))?;
        self.collector
            .invalidate_task(&ctx.task_id);
        Ok(ctx)
    }

    pub fn remove(
        &self,
        id: &str,
    ) -> Result<()>
    {
        let task_id = self
            .store
            .get(id)?
            .map(|c| c.task_id);
        if !self
            .store
            .remove(id)?
        {
            return Err(ContextError::NotFound { id: id.to_string() }.into());
        }
        if let Some(task_id) = task_id
        {
            self.collector
                .invalidate_task(&task_id);
        }
        info!(id, "context removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::core::store::MemoryStore;
    use crate::infra::config::CollectorConfig;

    fn service(root: &std::path::Path) -> Result<ContextService>
    {
        let collector = ContextCollector::new(CollectorConfig {
            root: root.to_path_buf(),
            ..Default::default()
        })?;
        Ok(ContextService::new(collector, Box::new(MemoryStore::new()), 24))
    }

    fn manual(content: &str) -> NewContext
    {
        NewContext {
            task_id: "F-9".into(),
            task_type: TaskType::Feature,
            kind: ContextKind::FileReference,
            file_path: Some(PathBuf::from("src/export.rs")),
            start_line: None,
            end_line: None,
            content: content.into(),
            description: String::new(),
            relevance_score: 0.7,
            keywords: vec!["export".into()],
        }
    }

    fn not_found(err: &anyhow::Error) -> bool
    {
        matches!(err.downcast_ref::<ContextError>(), Some(ContextError::NotFound { .. }))
    }

    #[test]
    fn add_update_remove_round() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let svc = service(tmp.path())?;

        let added = svc.add(manual("pub fn export_csv() {}"))?;
        assert!(
            added
                .id
                .starts_with("F-9_manual_")
        );
        assert_eq!(added.source, ContextSource::Manual);
        assert_eq!(added.description, "manual file_reference for src/export.rs");

        let before = added.last_checked_at;
        let updated = svc.update(
            &added.id,
            ContextPatch {
                relevance_score: Some(0.95),
                keywords: Some(vec!["csv".into()]),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.relevance_score, 0.95);
        assert_eq!(updated.keywords, vec!["csv"]);
        assert_eq!(updated.content, "pub fn export_csv() {}");
        assert!(updated.last_checked_at >= before);

        svc.remove(&added.id)?;
        assert!(svc.get("F-9")?.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_ids_are_not_found() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let svc = service(tmp.path())?;

        let err = svc
            .update("nope", ContextPatch::default())
            .unwrap_err();
        assert!(not_found(&err));
        let err = svc
            .remove("nope")
            .unwrap_err();
        assert!(not_found(&err));
        Ok(())
    }

    #[test]
    fn out_of_range_scores_are_rejected() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let svc = service(tmp.path())?;

        let mut bad = manual("x");
        bad.relevance_score = 1.5;
        let err = svc
            .add(bad)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ContextError>(), Some(ContextError::InvalidInput(_))));
        Ok(())
    }

    #[test]
    fn freshness_partitions_by_age() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let svc = service(tmp.path())?;
        let a = svc.add(manual("first"))?;
        let b = svc.add(manual("second"))?;
        svc.update(
            &b.id,
            ContextPatch {
                is_stale: Some(true),
                ..Default::default()
            },
        )?;

        let report = svc.check_freshness_at("F-9", Utc::now())?;
        assert_eq!(report.fresh.len(), 1);
        assert_eq!(report.fresh[0].id, a.id);
        assert_eq!(report.stale.len(), 1);

        let later = Utc::now() + Duration::hours(25);
        let report = svc.check_freshness_at("F-9", later)?;
        assert!(report.fresh.is_empty());
        assert_eq!(report.stale.len(), 2);
        assert!(
            svc.get("F-9")?
                .iter()
                .all(|c| c.is_stale && c.last_checked_at == later)
        );
        Ok(())
    }

    #[test]
    fn collect_persists_results() -> Result<()>
    {
        let tmp = TempDir::new()?;
        fs::write(
            tmp.path()
                .join("billing.py"),
            "def charge_invoice(invoice):\n    # invoice totals are rounded here\n    return round(invoice.total, 2)\n",
        )?;
        let svc = service(tmp.path())?;

        let mut input = TaskAnalysisInput::new(
            "B-3",
            TaskType::Bug,
            "Invoice rounding",
            "charge_invoice( rounds invoice totals incorrectly",
        );
        input.files = vec![PathBuf::from("billing.py")];

        let result = svc.collect(&input)?;
        assert!(
            !result
                .contexts
                .is_empty()
        );
        assert_eq!(svc.get("B-3")?.len(), result.contexts.len());
        Ok(())
    }
}
