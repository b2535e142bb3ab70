// Persistence through the tool-call surface: collected contexts
// survive a restart, manual contexts are kept across re-collection,
// and freshness stamps reach the store.
mod util;

use std::path::Path;

use anyhow::Result;
use chrono::{Duration, Utc};
use taskctx::core::collector::ContextCollector;
use taskctx::core::service::{ContextService, NewContext};
use taskctx::core::store::JsonlStore;
use taskctx::core::task::{ContextKind, ContextSource, TaskAnalysisInput, TaskType};
use taskctx::ContextError;

fn open(root: &Path, store: &Path) -> Result<ContextService>
{
    let collector = ContextCollector::new(util::config_for(root))?;
    Ok(ContextService::new(collector, Box::new(JsonlStore::new(store)), 24))
}

fn task() -> TaskAnalysisInput
{
    TaskAnalysisInput::new(
        "BUG-7",
        TaskType::Bug,
        "Profile crash",
        "TypeError: Cannot read properties of undefined\n    at processUser (/app/src/user.js:45:12)",
    )
}

#[test]
fn collected_contexts_survive_reopen() -> Result<()>
{
    let tmp = util::make_project();
    let store = tmp.path().join(".taskctx/contexts.jsonl");

    let collected = open(tmp.path(), &store)?.collect(&task())?;
    assert!(!collected.contexts.is_empty());

    // A fresh service sees the same rows, most relevant first
    let listed = open(tmp.path(), &store)?.get("BUG-7")?;
    assert_eq!(listed.len(), collected.contexts.len());
    assert!(listed.windows(2).all(|w| w[0].relevance_score >= w[1].relevance_score));
    assert!(listed.iter().all(|c| c.source == ContextSource::Collected));
    Ok(())
}

#[test]
fn manual_contexts_outlive_recollection() -> Result<()>
{
    let tmp = util::make_project();
    let store = tmp.path().join("contexts.jsonl");
    let svc = open(tmp.path(), &store)?;

    svc.collect(&task())?;
    let manual = svc.add(NewContext {
        task_id: "BUG-7".into(),
        task_type: TaskType::Bug,
        kind: ContextKind::Snippet,
        file_path: None,
        start_line: None,
        end_line: None,
        content: "profile.name may be undefined for invited users".into(),
        description: "note from triage".into(),
        relevance_score: 1.0,
        keywords: vec!["profile".into()],
    })?;

    // Re-collecting replaces collected rows only
    svc.collect(&task())?;
    let listed = svc.get("BUG-7")?;
    assert_eq!(listed[0].id, manual.id);
    assert_eq!(listed.iter().filter(|c| c.source == ContextSource::Manual).count(), 1);
    Ok(())
}

#[test]
fn freshness_is_persisted() -> Result<()>
{
    let tmp = util::make_project();
    let store = tmp.path().join("contexts.jsonl");
    open(tmp.path(), &store)?.collect(&task())?;

    let later = Utc::now() + Duration::hours(48);
    let report = open(tmp.path(), &store)?.check_freshness_at("BUG-7", later)?;
    assert!(report.fresh.is_empty());
    assert!(!report.stale.is_empty());

    let reread = open(tmp.path(), &store)?.get("BUG-7")?;
    assert!(reread.iter().all(|c| c.is_stale && c.last_checked_at == later));
    Ok(())
}

#[test]
fn removing_twice_reports_not_found() -> Result<()>
{
    let tmp = util::make_project();
    let store = tmp.path().join("contexts.jsonl");
    let svc = open(tmp.path(), &store)?;
    let first = svc.collect(&task())?.contexts.remove(0);

    svc.remove(&first.id)?;
    let err = svc.remove(&first.id).unwrap_err();
    assert!(matches!(err.downcast_ref::<ContextError>(), Some(ContextError::NotFound { .. })));
    Ok(())
}
