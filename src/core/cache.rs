//! Process-wide caches owned by the collector.
//!
//! [`ResultCache`] keeps the last context set per task with a TTL measured
//! from the set's earliest `collected_at` and a fixed entry cap evicting
//! the oldest inserted key. [`SignalMemo`] memoizes signal extraction per
//! task and request content.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use moka::sync::Cache;
use tracing::{debug, trace};
use xxhash_rust::xxh64::Xxh64;

use crate::core::signals::Signals;
use crate::core::task::{CodeContext, TaskAnalysisInput};

#[derive(Debug, Clone)]
struct CachedSet
{
    contexts: Vec<CodeContext>,
    earliest: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ResultCache
{
    entries: Mutex<IndexMap<String, CachedSet>>,
    ttl: chrono::Duration,
    max_entries: usize,
}

impl ResultCache
{
    pub fn new(
        expiry_hours: f64,
        max_entries: usize,
    ) -> Self
    {
        let secs = (expiry_hours.max(0.0) * 3600.0).round() as i64;
        Self {
            entries: Mutex::new(IndexMap::new()),
            ttl: chrono::Duration::seconds(secs),
            max_entries: max_entries.max(1),
        }
    }

    /// Apply new expiry and cap settings; shrinks immediately if needed
    pub fn reconfigure(
        &mut self,
        expiry_hours: f64,
        max_entries: usize,
    )
    {
        let entries = std::mem::take(
            self.entries
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        *self = Self::new(expiry_hours, max_entries);
        let map = self
            .entries
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        *map = entries;
        while map.len() > self.max_entries
        {
            map.shift_remove_index(0);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<String, CachedSet>>
    {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(
        &self,
        task_id: &str,
    ) -> Option<Vec<CodeContext>>
    {
        self.get_at(task_id, Utc::now())
    }

    /// Cached set for `task_id` if younger than the TTL at `now`.
    /// Expired entries are evicted on the way out.
    pub fn get_at(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Option<Vec<CodeContext>>
    {
        let mut map = self.lock();
        let age = now - map
            .get(task_id)?
            .earliest;

        if age >= self.ttl
        {
            map.shift_remove(task_id);
            debug!(task_id, age_secs = age.num_seconds(), "result cache entry expired");
            return None;
        }

        trace!(task_id, "result cache hit");
        map.get(task_id)
            .map(|e| {
                e.contexts
                    .clone()
            })
    }

    /// Store `contexts` for `task_id`. Empty sets are not cached.
    /// A re-write moves the key to the newest position.
    pub fn put(
        &self,
        task_id: &str,
        contexts: Vec<CodeContext>,
    )
    {
        let Some(earliest) = contexts
            .iter()
            .map(|c| c.collected_at)
            .min()
        else
        {
            self.invalidate(task_id);
            return;
        };

        let mut map = self.lock();
        map.shift_remove(task_id);
        map.insert(task_id.to_string(), CachedSet { contexts, earliest });

        while map.len() > self.max_entries
        {
            if let Some((evicted, _)) = map.shift_remove_index(0)
            {
                debug!(task_id = %evicted, "result cache full; evicted oldest entry");
            }
        }
    }

    pub fn invalidate(
        &self,
        task_id: &str,
    )
    {
        self.lock()
            .shift_remove(task_id);
    }

    pub fn len(&self) -> usize
    {
        self.lock()
            .len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }
}

/// Memo of extracted signals keyed by task id and a hash of every
/// request field extraction reads
#[derive(Clone)]
pub struct SignalMemo
{
    cache: Cache<String, Arc<Signals>>,
}

impl SignalMemo
{
    pub fn new(
        capacity: u64,
        ttl: Duration,
    ) -> Self
    {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// `{task_id}:{hash}` over the combined text, caller keywords and
    /// caller entities, each list entry unit-separated
    fn key(input: &TaskAnalysisInput) -> String
    {
        let mut hasher = Xxh64::new(0);
        hasher.update(
            input
                .combined_text()
                .as_bytes(),
        );
        for list in [&input.keywords, &input.entities]
        {
            hasher.update(b"\x1e");
            for item in list
            {
                hasher.update(item.as_bytes());
                hasher.update(b"\x1f");
            }
        }
        format!("{}:{:016x}", input.task_id, hasher.digest())
    }

    /// Cached signals for this request, computing them on a miss
    pub fn get_or_extract(
        &self,
        input: &TaskAnalysisInput,
        extract: impl FnOnce() -> Signals,
    ) -> Arc<Signals>
    {
        self.cache
            .get_with(Self::key(input), || Arc::new(extract()))
    }

    /// Drop every memoized entry of one task
    pub fn invalidate_task(
        &self,
        task_id: &str,
    )
    {
        let prefix = format!("{task_id}:");
        let stale: Vec<Arc<String>> = self
            .cache
            .iter()
            .map(|(key, _)| key)
            .filter(|key| key.starts_with(&prefix))
            .collect();
        for key in stale
        {
            self.cache
                .invalidate(key.as_str());
        }
        trace!(task_id, "signal memo entries dropped");
    }

    pub fn invalidate_all(&self)
    {
        self.cache
            .invalidate_all();
    }
}

#[cfg(test)]
mod tests
{
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::core::signals::Intent;
    use crate::core::task::{ContextKind, ContextSource, TaskType};

    fn ctx(
        id: &str,
        at: DateTime<Utc>,
    ) -> CodeContext
    {
        CodeContext {
            id: id.into(),
            task_id: "T".into(),
            task_type: TaskType::Bug,
            kind: ContextKind::Snippet,
            source: ContextSource::Collected,
            file_path: None,
            start_line: None,
            end_line: None,
            content: "x".into(),
            description: String::new(),
            relevance_score: 0.5,
            keywords: Vec::new(),
            collected_at: at,
            last_checked_at: at,
            is_stale: false,
        }
    }

    #[test]
    fn expires_from_earliest_member()
    {
        let cache = ResultCache::new(1.0, 10);
        let t0 = Utc::now();
        cache.put("T-1", vec![ctx("a", t0 + ChronoDuration::minutes(30)), ctx("b", t0)]);

        assert!(
            cache
                .get_at("T-1", t0 + ChronoDuration::minutes(59))
                .is_some()
        );
        assert!(
            cache
                .get_at("T-1", t0 + ChronoDuration::minutes(61))
                .is_none()
        );
        // Expired entries are evicted
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_oldest_insertion_past_cap()
    {
        let cache = ResultCache::new(1.0, 2);
        let now = Utc::now();
        cache.put("a", vec![ctx("1", now)]);
        cache.put("b", vec![ctx("2", now)]);
        // Re-writing "a" makes "b" the oldest
        cache.put("a", vec![ctx("3", now)]);
        cache.put("c", vec![ctx("4", now)]);

        assert_eq!(cache.len(), 2);
        assert!(
            cache
                .get_at("b", now)
                .is_none()
        );
        assert_eq!(
            cache
                .get_at("a", now)
                .unwrap()[0]
                .id,
            "3"
        );
        assert!(
            cache
                .get_at("c", now)
                .is_some()
        );
    }

    #[test]
    fn empty_sets_are_not_cached()
    {
        let cache = ResultCache::new(1.0, 2);
        cache.put("a", vec![ctx("1", Utc::now())]);
        cache.put("a", Vec::new());
        assert!(cache.is_empty());
    }

    fn make_signals() -> Signals
    {
        Signals {
            keywords: Vec::new(),
            entities: Vec::new(),
            intent: Intent::Debug,
            text: "t".into(),
            weighted: true,
        }
    }

    #[test]
    fn memo_reuses_signals_for_same_request()
    {
        let memo = SignalMemo::new(16, Duration::from_secs(60));
        let input = TaskAnalysisInput::new("T-1", TaskType::Bug, "Crash", "crash");

        let first = memo.get_or_extract(&input, make_signals);
        let mut called = false;
        let second = memo.get_or_extract(&input, || {
            called = true;
            make_signals()
        });
        assert!(!called);
        assert!(Arc::ptr_eq(&first, &second));

        let other = TaskAnalysisInput::new("T-1", TaskType::Bug, "Crash", "different text");
        let third = memo.get_or_extract(&other, make_signals);
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn caller_entities_and_keywords_change_the_memo_key()
    {
        let memo = SignalMemo::new(16, Duration::from_secs(60));
        let plain = TaskAnalysisInput::new("T-1", TaskType::Bug, "Crash", "crash");
        let first = memo.get_or_extract(&plain, make_signals);

        let mut with_entity = plain.clone();
        with_entity.entities = vec!["zzzMissing()".into()];
        let second = memo.get_or_extract(&with_entity, make_signals);
        assert!(!Arc::ptr_eq(&first, &second));

        // Same strings moved between lists are a different request
        let mut as_keyword = plain.clone();
        as_keyword.keywords = vec!["zzzMissing()".into()];
        let third = memo.get_or_extract(&as_keyword, make_signals);
        assert!(!Arc::ptr_eq(&second, &third));
    }

    #[test]
    fn invalidate_task_only_drops_that_task()
    {
        let memo = SignalMemo::new(16, Duration::from_secs(60));
        let one = TaskAnalysisInput::new("T-1", TaskType::Bug, "Crash", "crash");
        let eleven = TaskAnalysisInput::new("T-11", TaskType::Bug, "Crash", "crash");
        let first_one = memo.get_or_extract(&one, make_signals);
        let first_eleven = memo.get_or_extract(&eleven, make_signals);

        memo.invalidate_task("T-1");

        assert!(!Arc::ptr_eq(&first_one, &memo.get_or_extract(&one, make_signals)));
        assert!(Arc::ptr_eq(&first_eleven, &memo.get_or_extract(&eleven, make_signals)));
    }
}
