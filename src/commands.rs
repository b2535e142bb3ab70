//! Subcommand handlers: build the service from config, run one operation,
//! render the outcome as a table or JSON.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tabled::{Table, Tabled};
use tracing::{debug, instrument};

use crate::cli::{AddArgs, AppContext, CollectArgs, DepsArgs, GetArgs, RemoveArgs, UpdateArgs};
use crate::core::collector::ContextCollector;
use crate::core::service::{ContextPatch, ContextService, NewContext};
use crate::core::store::JsonlStore;
use crate::core::task::{CodeContext, ContextCollectionResult, TaskAnalysisInput, TaskType};
use crate::infra::config::load_config;

fn expand(path: &Path) -> Result<PathBuf>
{
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw).with_context(|| format!("Failed to expand path {raw}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Load config, apply CLI overrides and open the JSON-lines store
pub fn open_service(ctx: &AppContext) -> Result<ContextService>
{
    let mut cfg = load_config()?;

    if let Some(root) = &ctx.root
    {
        cfg.collector
            .root = expand(root)?;
    }
    let store_path = match &ctx.store
    {
        Some(p) => expand(p)?,
        None => expand(&cfg.store.path)?,
    };
    let store_path = if store_path.is_relative()
    {
        cfg.collector
            .root
            .join(store_path)
    }
    else
    {
        store_path
    };
    debug!(root = %cfg.collector.root.display(), store = %store_path.display(), "opening context service");

    let collector = ContextCollector::new(cfg.collector)?;
    Ok(ContextService::new(
        collector,
        Box::new(JsonlStore::new(store_path)),
        cfg.store
            .freshness_hours,
    ))
}

fn spinner(
    ctx: &AppContext,
    hidden: bool,
    msg: String,
) -> ProgressBar
{
    if ctx.quiet || hidden
    {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()>
{
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{out}");
    Ok(())
}

fn heading(
    ctx: &AppContext,
    text: &str,
) -> String
{
    if ctx.no_color { text.to_string() } else { text.bold().to_string() }
}

fn score_cell(
    ctx: &AppContext,
    score: f32,
) -> String
{
    let text = format!("{score:.2}");
    if ctx.no_color
    {
        text
    }
    else if score >= 0.7
    {
        text.green()
            .to_string()
    }
    else if score >= 0.4
    {
        text.yellow()
            .to_string()
    }
    else
    {
        text.dimmed()
            .to_string()
    }
}

#[derive(Tabled)]
struct ContextRow
{
    score: String,
    kind: &'static str,
    location: String,
    description: String,
    id: String,
}

fn location(c: &CodeContext) -> String
{
    let Some(path) = &c.file_path
    else
    {
        return "-".to_string();
    };
    match (c.start_line, c.end_line)
    {
        (Some(s), Some(e)) if s != e => format!("{}:{s}-{e}", path.display()),
        (Some(s), _) => format!("{}:{s}", path.display()),
        _ => path
            .display()
            .to_string(),
    }
}

fn print_contexts(
    ctx: &AppContext,
    contexts: &[CodeContext],
)
{
    if contexts.is_empty()
    {
        println!("No contexts.");
        return;
    }
    let rows: Vec<ContextRow> = contexts
        .iter()
        .map(|c| ContextRow {
            score: score_cell(ctx, c.relevance_score),
            kind: c
                .kind
                .as_str(),
            location: location(c),
            description: c
                .description
                .clone(),
            id: c
                .id
                .clone(),
        })
        .collect();
    println!("{}", Table::new(rows));
}

fn print_lines(
    ctx: &AppContext,
    title: &str,
    lines: &[String],
)
{
    if lines.is_empty()
    {
        return;
    }
    println!("\n{}:", heading(ctx, title));
    for line in lines
    {
        println!("  - {line}");
    }
}

fn print_result(
    ctx: &AppContext,
    result: &ContextCollectionResult,
)
{
    print_contexts(ctx, &result.contexts);

    let s = &result.summary;
    println!(
        "\n{} {} contexts ({} high, {} medium, {} low), avg {:.2}, {} files, {} ms{}",
        heading(ctx, "Summary:"),
        s.total_contexts,
        s.high_relevance,
        s.medium_relevance,
        s.low_relevance,
        s.average_score,
        s.files_analyzed,
        s.processing_time_ms,
        if result.from_cache { " (cached)" } else { "" },
    );
    print_lines(ctx, "Recommendations", &result.recommendations);
    print_lines(ctx, "Potential issues", &result.potential_issues);
}

fn task_input(args: &CollectArgs) -> Result<TaskAnalysisInput>
{
    // 1) Whole task from a JSON file
    if let Some(path) = &args.task_file
    {
        let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        return serde_json::from_str(&raw).with_context(|| format!("Failed to parse task file {}", path.display()));
    }

    // 2) Assemble from flags; missing identity fields fail validation later
    let mut input = TaskAnalysisInput::new(
        args.task_id
            .clone()
            .unwrap_or_default(),
        args.task_type
            .map(TaskType::from)
            .unwrap_or(TaskType::Bug),
        args.title
            .clone()
            .unwrap_or_default(),
        args.description
            .clone()
            .unwrap_or_default(),
    );
    input.current_state = args
        .current_state
        .clone();
    input.desired_state = args
        .desired_state
        .clone();
    input.expected_behavior = args
        .expected
        .clone();
    input.actual_behavior = args
        .actual
        .clone();
    input.files = args
        .files
        .clone();
    input.keywords = args
        .keywords
        .clone();
    input.entities = args
        .entities
        .clone();
    Ok(input)
}

#[instrument(skip_all)]
pub fn collect_run(
    args: CollectArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let input = task_input(&args)?;
    let service = open_service(ctx)?;

    let pb = spinner(ctx, args.json, format!("collecting context for {}", input.task_id));
    let result = service.collect(&input);
    pb.finish_and_clear();
    let result = result?;

    if args.json
    {
        return print_json(&result);
    }
    print_result(ctx, &result);
    Ok(())
}

pub fn get_run(
    args: GetArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let contexts = open_service(ctx)?.get(&args.task_id)?;
    if args.json
    {
        return print_json(&contexts);
    }
    print_contexts(ctx, &contexts);
    Ok(())
}

pub fn check_freshness_run(
    args: GetArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let report = open_service(ctx)?.check_freshness(&args.task_id)?;
    if args.json
    {
        return print_json(&report);
    }

    let fresh = format!("{} fresh", report.fresh.len());
    let stale = format!("{} stale", report.stale.len());
    if ctx.no_color
    {
        println!("{fresh}, {stale}");
    }
    else
    {
        println!("{}, {}", fresh.green(), stale.yellow());
    }
    if !report
        .stale
        .is_empty()
    {
        print_contexts(ctx, &report.stale);
    }
    Ok(())
}

pub fn add_run(
    args: AddArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let content = match (&args.content, &args.content_file)
    {
        (Some(c), _) => c.clone(),
        (None, Some(path)) => fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => String::new(),
    };

    let added = open_service(ctx)?.add(NewContext {
        task_id: args.task_id,
        task_type: args
            .task_type
            .into(),
        kind: args
            .kind
            .into(),
        file_path: args.file,
        start_line: args.start_line,
        end_line: args.end_line,
        content,
        description: args.description,
        relevance_score: args.score,
        keywords: args.keywords,
    })?;

    if args.json
    {
        return print_json(&added);
    }
    if !ctx.quiet
    {
        println!("Added {}", added.id);
    }
    Ok(())
}

pub fn update_run(
    args: UpdateArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let is_stale = match (args.stale, args.fresh)
    {
        (true, _) => Some(true),
        (false, true) => Some(false),
        _ => None,
    };
    let patch = ContextPatch {
        content: args.content,
        description: args.description,
        relevance_score: args.score,
        keywords: (!args
            .keywords
            .is_empty())
        .then_some(args.keywords),
        is_stale,
    };

    let updated = open_service(ctx)?.update(&args.id, patch)?;
    if args.json
    {
        return print_json(&updated);
    }
    if !ctx.quiet
    {
        println!("Updated {}", updated.id);
    }
    Ok(())
}

pub fn remove_run(
    args: RemoveArgs,
    ctx: &AppContext,
) -> Result<()>
{
    open_service(ctx)?.remove(&args.id)?;
    if !ctx.quiet
    {
        println!("Removed {}", args.id);
    }
    Ok(())
}

pub fn deps_run(
    args: DepsArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let service = open_service(ctx)?;
    let pb = spinner(ctx, args.json, "mapping imports".to_string());
    let graph = service
        .collector()
        .dependency_graph();
    pb.finish_and_clear();
    let graph = graph?;

    if args.json
    {
        return print_json(&graph);
    }

    println!(
        "{} {} files, {} import edges",
        heading(ctx, "Graph:"),
        graph
            .files
            .len(),
        graph
            .edges
            .len()
    );
    if !graph.has_cycles()
    {
        println!("No import cycles.");
        return Ok(());
    }
    let cycles: Vec<String> = graph
        .cycles
        .iter()
        .map(|cycle| {
            cycle
                .iter()
                .chain(cycle.first())
                .map(|p| {
                    p.display()
                        .to_string()
                })
                .collect::<Vec<_>>()
                .join(" -> ")
        })
        .collect();
    print_lines(ctx, "Cycles", &cycles);
    Ok(())
}
