//! The context collection pipeline.
//!
//! One run proceeds in a fixed order: walk, signals, stack traces (bug
//! tasks only), definition and similar-section search, dependency scan,
//! candidate sections, scoring, then filter, convert, dedupe and budget.
//! Per-file failures are logged and skipped; a dependency scan failure
//! degrades to "no dependency info"; anything else fails the whole run.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use itertools::Itertools;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{
    BudgetOutcome, apply_token_budget, convert_sections, dedupe_contexts, filter_sections,
};
use crate::core::cache::{ResultCache, SignalMemo};
use crate::core::dependencies::{DependencyAnalyzer, DependencyGraph};
use crate::core::patterns::{EntityRoute, PatternMatch, PatternMatcher, route_entity};
use crate::core::scoring::RelevanceScorer;
use crate::core::sections::SectionExtractor;
use crate::core::signals::{EntityKind, ScoredExtractor, SignalExtractor, Signals};
use crate::core::stack_trace::{ParsedStackTrace, StackTraceParser};
use crate::core::task::{
    CodeContext, CodeSection, CollectionSummary, ContextCollectionResult, MEDIUM_RELEVANCE,
    TaskAnalysisInput, TaskType,
};
use crate::infra::config::CollectorConfig;
use crate::infra::paths::{PathGuard, ResolvedPath};
use crate::infra::walk::FileWalker;

/// Fewer high-relevance contexts than this triggers a recommendation
const MIN_HIGH_RELEVANCE: usize = 3;

/// Traces at or above this confidence are called out
const CONFIDENT_TRACE: f32 = 0.8;

/// Signal memo sizing
const MEMO_CAPACITY: u64 = 256;
const MEMO_TTL: Duration = Duration::from_secs(15 * 60);

/// Dependency stage output
#[derive(Debug, Default)]
struct DependencyStage
{
    graph: DependencyGraph,
    sections: Vec<CodeSection>,
}

pub struct ContextCollector
{
    config: CollectorConfig,
    extractor: Box<dyn SignalExtractor>,
    traces: StackTraceParser,
    patterns: PatternMatcher,
    dependencies: DependencyAnalyzer,
    cache: ResultCache,
    memo: SignalMemo,
    /// One lock per task id; concurrent runs for the same task serialize
    task_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContextCollector
{
    /// Collector with the scored signal extractor and a fresh cache
    pub fn new(mut config: CollectorConfig) -> Result<Self>
    {
        config.validate()?;

        Ok(Self {
            extractor: Box::new(ScoredExtractor::new()?),
            traces: StackTraceParser::new()?,
            patterns: PatternMatcher::new(
                config.max_file_size,
                config.max_patterns_per_entity,
                config.similarity_threshold,
            )?,
            dependencies: DependencyAnalyzer::new(config.max_file_size)?,
            cache: ResultCache::new(config.cache_expiry_hours, config.cache_max_entries),
            memo: SignalMemo::new(MEMO_CAPACITY, MEMO_TTL),
            task_locks: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Swap the signal extractor (e.g. the degraded fallback)
    pub fn with_extractor(
        mut self,
        extractor: Box<dyn SignalExtractor>,
    ) -> Self
    {
        self.extractor = extractor;
        self.memo
            .invalidate_all();
        self
    }

    /// Inject a result cache
    pub fn with_cache(
        mut self,
        cache: ResultCache,
    ) -> Self
    {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &CollectorConfig
    {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache
    {
        &self.cache
    }

    /// Forget everything remembered about one task: its cached result
    /// and its memoized signals
    pub fn invalidate_task(
        &self,
        task_id: &str,
    )
    {
        self.cache
            .invalidate(task_id);
        self.memo
            .invalidate_task(task_id);
    }

    /// Change settings at runtime. The edit is validated before it takes
    /// effect; dependent components are rebuilt and the signal memo is dropped.
    pub fn update_config(
        &mut self,
        edit: impl FnOnce(&mut CollectorConfig),
    ) -> Result<()>
    {
        let mut next = self
            .config
            .clone();
        edit(&mut next);
        next.validate()?;

        self.patterns =
            PatternMatcher::new(next.max_file_size, next.max_patterns_per_entity, next.similarity_threshold)?;
        self.dependencies = DependencyAnalyzer::new(next.max_file_size)?;
        self.cache
            .reconfigure(next.cache_expiry_hours, next.cache_max_entries);
        self.memo
            .invalidate_all();
        self.config = next;

        info!("collector configuration updated");
        Ok(())
    }

    fn task_lock(
        &self,
        task_id: &str,
    ) -> Arc<Mutex<()>>
    {
        self.task_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(task_id.to_string())
            .or_default()
            .clone()
    }

    /// Guard plus the guarded file list for this run
    fn scan_files(&self) -> Result<(PathGuard, Vec<ResolvedPath>)>
    {
        let guard = PathGuard::new(&self.config.root, &self.config.exclude_patterns)?;
        let walker = FileWalker::new(&self.config.exclude_patterns)
            .context("Failed to build file walker")?
            .with_extensions(&self.config.include_extensions);

        let files: Vec<ResolvedPath> = walker
            .walk_files(guard.root())
            .iter()
            .filter_map(|p| guard.resolve(p))
            .collect();

        debug!(files = files.len(), root = %guard.root().display(), "files enumerated");
        Ok((guard, files))
    }

    /// Run the pipeline for one task. A fresh cached result is returned
    /// as-is; otherwise the result replaces the cache entry.
    #[instrument(level = "info", skip_all, fields(task_id = %input.task_id, task_type = %input.task_type))]
    pub fn collect(
        &self,
        input: &TaskAnalysisInput,
    ) -> Result<ContextCollectionResult>
    {
        input.validate()?;

        let lock = self.task_lock(&input.task_id);
        let _serialized = lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let started = Instant::now();
        let text = input.combined_text();

        // 1) Cache
        if let Some(contexts) = self
            .cache
            .get(&input.task_id)
        {
            debug!(contexts = contexts.len(), "served from result cache");
            let stack_traces = self.stack_traces(input.task_type, &text);
            let mut summary = CollectionSummary::from_contexts(&contexts);
            summary.stack_traces_found = stack_traces.len();
            summary.processing_time_ms = started
                .elapsed()
                .as_millis() as u64;
            return Ok(ContextCollectionResult {
                contexts,
                summary,
                recommendations: Vec::new(),
                potential_issues: Vec::new(),
                stack_traces,
                from_cache: true,
            });
        }

        // 2) Files under the guarded root
        let (guard, files) = self.scan_files()?;

        // 3) Signals, memoized per request
        let signals = self
            .memo
            .get_or_extract(input, || {
                self.extractor
                    .extract(input)
            });
        debug!(
            extractor = self.extractor.name(),
            keywords = signals.keywords.len(),
            entities = signals.entities.len(),
            intent = ?signals.intent,
            "signals extracted"
        );

        // 4) Stack traces
        let stack_traces = self.stack_traces(input.task_type, &text);

        // 5) Files the reporter named, explicitly or as file entities
        let named = named_files(&guard, input, &signals, &files);

        // 6) Definitions and similar sections
        let matches: Vec<PatternMatch> = if self
            .config
            .enable_pattern_matching
        {
            signals
                .entities
                .iter()
                .filter(|e| route_entity(e) != EntityRoute::Skip)
                .flat_map(|e| {
                    self.patterns
                        .find_definitions(e, &files)
                })
                .collect()
        }
        else
        {
            Vec::new()
        };
        let similar = if self
            .config
            .enable_pattern_matching
        {
            self.patterns
                .find_similar(&text, &files)
        }
        else
        {
            Vec::new()
        };

        let extractor = SectionExtractor::new(
            &guard,
            &signals,
            self.config
                .max_file_size,
            self.config
                .context_size,
            self.config
                .stack_frame_window,
        )?;

        // 7) Dependencies
        let deps = if self
            .config
            .enable_dependency_analysis
        {
            match self.dependency_stage(&extractor, &files, &named)
            {
                Ok(stage) => stage,
                Err(e) =>
                {
                    warn!(error = %e, "dependency analysis failed; continuing without it");
                    DependencyStage::default()
                }
            }
        }
        else
        {
            DependencyStage::default()
        };

        // 8) Candidate sections
        let mut sections = extractor.from_patterns(&matches);
        sections.extend(extractor.from_frames(&stack_traces, &files));
        let covered: HashSet<PathBuf> = sections
            .iter()
            .map(|s| {
                s.file_path
                    .clone()
            })
            .collect();
        sections.extend(deps.sections);
        sections.extend(extractor.from_named_files(&named, &covered));
        sections.extend(extractor.from_similar(&similar));
        debug!(candidates = sections.len(), "candidate sections assembled");

        // 9) Score
        let explicit: Vec<PathBuf> = named
            .iter()
            .map(|f| {
                f.relative
                    .clone()
            })
            .collect();
        let scorer = RelevanceScorer::new(self.config.weights, &signals, input.task_type, &explicit)?;
        let ranked = scorer.rank(sections);

        // 10) Filter, convert, dedupe, budget
        let kept = filter_sections(
            ranked,
            self.config
                .relevance_threshold,
            self.config
                .max_contexts_per_task,
        );
        let keyword_terms: Vec<String> = signals
            .keywords
            .iter()
            .map(|k| {
                k.term
                    .clone()
            })
            .collect();
        let mut contexts = convert_sections(kept, input, &keyword_terms, Utc::now());
        if self
            .config
            .enable_deduplication
        {
            contexts = dedupe_contexts(contexts);
        }
        let budget = apply_token_budget(
            contexts,
            self.config
                .token_ceiling(input.task_type),
            self.config
                .max_tokens_per_context,
            self.config
                .enable_summarization,
        );

        // 11) Report
        let mut summary = CollectionSummary::from_contexts(&budget.contexts);
        summary.processing_time_ms = started
            .elapsed()
            .as_millis() as u64;
        summary.patterns_found = matches.len() + similar.len();
        summary.dependencies_found = deps
            .graph
            .edges
            .len();
        summary.stack_traces_found = stack_traces.len();

        let recommendations = recommendations(&budget.contexts, &summary, &signals, &matches, &stack_traces);
        let potential_issues = potential_issues(&summary, &deps.graph, &budget);

        info!(
            contexts = summary.total_contexts,
            high = summary.high_relevance,
            ms = summary.processing_time_ms,
            "collection finished"
        );

        self.cache
            .put(&input.task_id, budget.contexts.clone());

        Ok(ContextCollectionResult {
            contexts: budget.contexts,
            summary,
            recommendations,
            potential_issues,
            stack_traces,
            from_cache: false,
        })
    }

    /// Traces are only looked for in bug tasks
    fn stack_traces(
        &self,
        task_type: TaskType,
        text: &str,
    ) -> Vec<ParsedStackTrace>
    {
        if task_type != TaskType::Bug
        {
            return Vec::new();
        }
        self.traces
            .parse(text)
    }

    /// Full graph over `files`, plus import sections for each named file
    fn dependency_stage(
        &self,
        extractor: &SectionExtractor<'_>,
        files: &[ResolvedPath],
        named: &[ResolvedPath],
    ) -> Result<DependencyStage>
    {
        let graph = self
            .dependencies
            .build_graph(files);

        let mut sections = Vec::new();
        for file in named
        {
            let imports = self
                .dependencies
                .map_file_relationships(file)
                .with_context(|| format!("Failed to map imports of {}", file.relative.display()))?;
            sections.extend(extractor.from_imports(file, &imports));
        }

        Ok(DependencyStage { graph, sections })
    }

    /// Dependency graph for the configured root (the `deps` command)
    pub fn dependency_graph(&self) -> Result<DependencyGraph>
    {
        let (_guard, files) = self.scan_files()?;
        Ok(self
            .dependencies
            .build_graph(&files))
    }
}

/// Explicit input files plus file-kind entities, each passed through the
/// guard. File entities also match walked files by path suffix.
fn named_files(
    guard: &PathGuard,
    input: &TaskAnalysisInput,
    signals: &Signals,
    walked: &[ResolvedPath],
) -> Vec<ResolvedPath>
{
    let mut out: Vec<ResolvedPath> = input
        .files
        .iter()
        .filter_map(|f| guard.resolve(f))
        .collect();

    for entity in signals
        .entities
        .iter()
        .filter(|e| e.kind == EntityKind::File)
    {
        let wanted = Path::new(&entity.name);
        if let Some(found) = guard
            .resolve(wanted)
            .or_else(|| {
                walked
                    .iter()
                    .find(|f| f.relative.ends_with(wanted))
                    .cloned()
            })
        {
            out.push(found);
        }
    }

    let mut seen = HashSet::new();
    out.retain(|f| seen.insert(f.relative.clone()));
    out
}

fn extension_of(path: &Path) -> Option<String>
{
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Human-readable hints about the result
fn recommendations(
    contexts: &[CodeContext],
    summary: &CollectionSummary,
    signals: &Signals,
    matches: &[PatternMatch],
    traces: &[ParsedStackTrace],
) -> Vec<String>
{
    let mut out = Vec::new();

    if summary.high_relevance < MIN_HIGH_RELEVANCE
    {
        out.push(format!(
            "Only {} high-relevance context(s) found; name the affected files or functions to sharpen the search",
            summary.high_relevance
        ));
    }

    let matched: HashSet<&str> = matches
        .iter()
        .map(|m| m.entity.as_str())
        .collect();
    let unmatched: Vec<&str> = signals
        .entities
        .iter()
        .filter(|e| route_entity(e) == EntityRoute::Function && !matched.contains(e.name.as_str()))
        .map(|e| e.name.as_str())
        .collect();
    if !unmatched.is_empty()
    {
        out.push(format!("No definition found for: {}", unmatched.join(", ")));
    }

    // Same name defined in several files
    for (name, group) in &matches
        .iter()
        .map(|m| (m.name.as_str(), &m.file_path))
        .sorted()
        .dedup()
        .chunk_by(|(name, _)| *name)
    {
        let count = group.count();
        if count > 1
        {
            out.push(format!("`{name}` is defined in {count} files; consider consolidating the pattern"));
        }
    }

    for trace in traces
        .iter()
        .filter(|t| t.confidence >= CONFIDENT_TRACE)
    {
        if let Some(top) = trace.top_frame()
        {
            out.push(format!(
                "High-confidence {} stack trace; start at {}:{}",
                trace
                    .language
                    .as_str(),
                top.file,
                top.line
            ));
        }
    }

    let languages: BTreeSet<String> = contexts
        .iter()
        .filter_map(|c| {
            c.file_path
                .as_deref()
                .and_then(extension_of)
        })
        .collect();
    if languages.len() > 1
    {
        out.push(format!(
            "Contexts span multiple languages ({}); check cross-language boundaries",
            languages
                .iter()
                .join(", ")
        ));
    }

    out
}

/// Problems worth surfacing alongside the contexts
fn potential_issues(
    summary: &CollectionSummary,
    graph: &DependencyGraph,
    budget: &BudgetOutcome,
) -> Vec<String>
{
    let mut out: Vec<String> = graph
        .cycles
        .iter()
        .map(|cycle| {
            let mut names: Vec<String> = cycle
                .iter()
                .map(|p| {
                    p.display()
                        .to_string()
                })
                .collect();
            if let Some(first) = names
                .first()
                .cloned()
            {
                names.push(first);
            }
            format!("Circular dependency: {}", names.join(" -> "))
        })
        .collect();

    if budget.summarized > 0
    {
        out.push(format!(
            "{} oversized section(s) exceeded the per-context token limit and were summarized",
            budget.summarized
        ));
    }
    if budget.dropped > 0
    {
        out.push(format!("{} context(s) dropped to stay within the token budget", budget.dropped));
    }

    if summary.total_contexts > 0 && summary.low_relevance * 2 > summary.total_contexts
    {
        out.push(format!(
            "{} of {} contexts score below {MEDIUM_RELEVANCE}; results may be off-target",
            summary.low_relevance, summary.total_contexts
        ));
    }

    out
}
