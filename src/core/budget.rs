use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use xxhash_rust::xxh64::xxh64;

use crate::core::task::{
    CodeContext, CodeSection, ContextKind, ContextSource, TaskAnalysisInput,
};

/// Characters per estimated token
pub const CHARS_PER_TOKEN: usize = 4;

/// Normalized prefix length hashed for deduplication
pub const DEDUPE_PREFIX_CHARS: usize = 200;

/// Marker appended to summarized descriptions
pub const SUMMARIZED_SUFFIX: &str = " (summarized)";

const ELLIPSIS: &str = "...";

/// Smallest partial line worth keeping when cutting mid-line
const MIN_PARTIAL_CHARS: usize = 16;

/// ceil(chars / 4)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Drop sections below `threshold`, then keep the best `max`.
/// Input order is re-sorted by score (stable), so ties keep extraction order.
pub fn filter_sections(
    mut sections: Vec<CodeSection>,
    threshold: f32,
    max: usize,
) -> Vec<CodeSection> {
    sections.retain(|s| s.score >= threshold);
    sections.sort_by(|a, b| b.score.total_cmp(&a.score));
    sections.truncate(max);
    sections
}

/// "lines 12-40" / "line 7"
fn line_span(start: usize, end: usize) -> String {
    if start == end {
        format!("line {start}")
    } else {
        format!("lines {start}-{end}")
    }
}

/// Map surviving sections to contexts with ids `{task}_context_{i}`.
/// Each context carries the task keywords occurring in its content.
pub fn convert_sections(
    sections: Vec<CodeSection>,
    input: &TaskAnalysisInput,
    keywords: &[String],
    now: DateTime<Utc>,
) -> Vec<CodeContext> {
    sections
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            let basename = s
                .file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| s.file_path.to_string_lossy().into_owned());
            let lowered = s.content.to_lowercase();
            let matched = keywords
                .iter()
                .filter(|k| lowered.contains(k.to_lowercase().as_str()))
                .cloned()
                .collect();

            CodeContext {
                id: format!("{}_context_{}", input.task_id, i),
                task_id: input.task_id.clone(),
                task_type: input.task_type,
                kind: ContextKind::from(s.kind),
                source: ContextSource::Collected,
                description: format!(
                    "{} in {} ({})",
                    s.kind,
                    basename,
                    line_span(s.start_line, s.end_line)
                ),
                file_path: Some(s.file_path),
                start_line: Some(s.start_line),
                end_line: Some(s.end_line),
                content: s.content,
                relevance_score: s.score.clamp(0.0, 1.0),
                keywords: matched,
                collected_at: now,
                last_checked_at: now,
                is_stale: false,
            }
        })
        .collect()
}

/// Lowercase, collapse whitespace, keep the first 200 characters
pub fn normalized_prefix(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(DEDUPE_PREFIX_CHARS)
        .collect()
}

pub fn content_hash(content: &str) -> u64 {
    xxh64(normalized_prefix(content).as_bytes(), 0)
}

/// Keep the first context per normalized-prefix hash. A repeat merges
/// its keywords into the kept context and lifts its score to the max.
#[instrument(level = "debug", skip_all, fields(n = contexts.len()))]
pub fn dedupe_contexts(contexts: Vec<CodeContext>) -> Vec<CodeContext> {
    let mut kept: Vec<CodeContext> = Vec::with_capacity(contexts.len());
    let mut by_hash: HashMap<u64, usize> = HashMap::new();

    for ctx in contexts {
        let h = content_hash(&ctx.content);
        match by_hash.get(&h) {
            Some(&idx) => {
                let first = &mut kept[idx];
                for k in ctx.keywords {
                    if !first.keywords.contains(&k) {
                        first.keywords.push(k);
                    }
                }
                first.relevance_score = first.relevance_score.max(ctx.relevance_score);
                debug!(kept = %first.id, dropped = %ctx.id, "merged duplicate context");
            }
            None => {
                by_hash.insert(h, kept.len());
                kept.push(ctx);
            }
        }
    }

    kept
}

/// Prefix of `content` estimated at no more than `max_tokens`.
///
/// Whole lines, terminators included, are kept while they fit in
/// `max_tokens * 4` characters. The first line that does not fit is cut
/// with an ellipsis when enough room is left; otherwise the summary ends
/// after the previous line's terminator. Without the ellipsis the result
/// is always a prefix of `content`.
pub fn summarize(content: &str, max_tokens: usize) -> String {
    if estimate_tokens(content) <= max_tokens {
        return content.to_string();
    }

    let budget = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut out = String::new();
    let mut used = 0usize;

    for piece in content.split_inclusive('\n') {
        let len = piece.chars().count();

        if used + len <= budget {
            out.push_str(piece);
            used += len;
            continue;
        }

        let body = piece.trim_end_matches(['\r', '\n']);
        let room = budget.saturating_sub(used + ELLIPSIS.len());
        if room >= MIN_PARTIAL_CHARS || (out.is_empty() && room > 0) {
            out.extend(body.chars().take(room));
            out.push_str(ELLIPSIS);
        }
        break;
    }

    out
}

/// What budgeting did to a context list
#[derive(Debug, Clone, Default)]
pub struct BudgetOutcome {
    pub contexts: Vec<CodeContext>,
    pub total_tokens: usize,
    pub summarized: usize,
    pub dropped: usize,
}

/// Greedy token budget.
///
/// Contexts are re-sorted by score (stable). A context estimated above
/// `per_context` is summarized down to it first when `summarize_large` is
/// set. A context that still does not fit in what remains of `ceiling` is
/// skipped, and later (smaller) contexts may still be accepted.
#[instrument(level = "debug", skip(contexts), fields(n = contexts.len()))]
pub fn apply_token_budget(
    mut contexts: Vec<CodeContext>,
    ceiling: usize,
    per_context: usize,
    summarize_large: bool,
) -> BudgetOutcome {
    contexts.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

    let mut outcome = BudgetOutcome::default();
    for mut ctx in contexts {
        if summarize_large && estimate_tokens(&ctx.content) > per_context {
            ctx.content = summarize(&ctx.content, per_context);
            ctx.description.push_str(SUMMARIZED_SUFFIX);
            outcome.summarized += 1;
        }

        let tokens = estimate_tokens(&ctx.content);
        if outcome.total_tokens + tokens <= ceiling {
            outcome.total_tokens += tokens;
            outcome.contexts.push(ctx);
        } else {
            outcome.dropped += 1;
        }
    }

    debug!(
        kept = outcome.contexts.len(),
        dropped = outcome.dropped,
        summarized = outcome.summarized,
        tokens = outcome.total_tokens,
        "token budget applied"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::task::{SectionKind, TaskType};

    fn section(score: f32, line: usize) -> CodeSection {
        CodeSection {
            file_path: PathBuf::from("src/user.js"),
            start_line: line,
            end_line: line + 4,
            content: format!("function f{line}() {{ return processUser(); }}"),
            score,
            kind: SectionKind::Function,
            related_entities: Vec::new(),
        }
    }

    fn context(id: &str, content: &str, score: f32, keywords: &[&str]) -> CodeContext {
        let now = Utc::now();
        CodeContext {
            id: id.into(),
            task_id: "T-1".into(),
            task_type: TaskType::Bug,
            kind: ContextKind::Snippet,
            source: ContextSource::Collected,
            file_path: None,
            start_line: None,
            end_line: None,
            content: content.into(),
            description: "usage in a.js (lines 1-3)".into(),
            relevance_score: score,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            collected_at: now,
            last_checked_at: now,
            is_stale: false,
        }
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn filter_applies_threshold_then_cap() {
        let sections = vec![section(0.2, 1), section(0.9, 10), section(0.5, 20), section(0.7, 30)];
        let kept = filter_sections(sections, 0.3, 2);
        let scores: Vec<f32> = kept.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn convert_builds_ids_and_descriptions() {
        let input = TaskAnalysisInput::new("BUG-7", TaskType::Bug, "t", "d");
        let mut s = section(0.8, 40);
        s.kind = SectionKind::Import;
        let ctxs = convert_sections(
            vec![section(0.9, 1), s],
            &input,
            &["processuser".to_string(), "absent".to_string()],
            Utc::now(),
        );

        assert_eq!(ctxs[0].id, "BUG-7_context_0");
        assert_eq!(ctxs[1].id, "BUG-7_context_1");
        assert_eq!(ctxs[0].description, "function in user.js (lines 1-5)");
        assert_eq!(ctxs[1].kind, ContextKind::Dependency);
        assert_eq!(ctxs[0].keywords, vec!["processuser"]);
    }

    #[test]
    fn dedupe_merges_keywords_and_keeps_max_score() {
        let a = context("a", "Fn   Foo()\n{ return 1; }", 0.4, &["foo"]);
        let b = context("b", "fn foo() { RETURN 1; }", 0.9, &["bar", "foo"]);
        let c = context("c", "something else", 0.5, &[]);

        let out = dedupe_contexts(vec![a, b, c]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "a");
        assert_eq!(out[0].keywords, vec!["foo", "bar"]);
        assert_eq!(out[0].relevance_score, 0.9);
    }

    #[test]
    fn dedupe_only_looks_at_prefix() {
        let shared = "x".repeat(DEDUPE_PREFIX_CHARS);
        let a = context("a", &format!("{shared} tail one"), 0.5, &[]);
        let b = context("b", &format!("{shared} tail two"), 0.5, &[]);
        assert_eq!(dedupe_contexts(vec![a, b]).len(), 1);
    }

    #[test]
    fn summarize_keeps_short_content() {
        assert_eq!(summarize("short", 10), "short");
    }

    #[test]
    fn summarize_cuts_mid_line_with_marker() {
        let content = "a".repeat(400);
        let out = summarize(&content, 50);
        assert!(estimate_tokens(&out) <= 50);
        assert!(out.ends_with(ELLIPSIS));
        assert_eq!(out.chars().count(), 200);
    }

    #[test]
    fn summarize_stops_at_line_when_little_room() {
        // Two 95-char lines fit a 200-char budget; the third would get 5 chars
        let line = "b".repeat(95);
        let content = format!("{line}\n{line}\n{line}");
        let out = summarize(&content, 50);
        assert_eq!(out, format!("{line}\n{line}\n"));
    }

    #[test]
    fn summarize_keeps_leading_blank_lines() {
        let content = format!("\n\n{}", "x".repeat(100));
        let out = summarize(&content, 10);

        let kept = out.strip_suffix(ELLIPSIS).expect("cut mid-line");
        assert!(content.starts_with(kept));
        assert!(kept.starts_with("\n\nx"));
        assert!(estimate_tokens(&out) <= 10);
    }

    #[test]
    fn summarize_keeps_crlf_terminators() {
        let content = format!("{}\r\n{}", "a".repeat(20), "b".repeat(100));
        let out = summarize(&content, 10);

        // 15 chars of room after the first line is below the partial minimum
        assert_eq!(out, format!("{}\r\n", "a".repeat(20)));
        assert!(content.starts_with(&out));
    }

    #[test]
    fn budget_summarizes_then_accepts_greedily() {
        let big = "c".repeat(1200); // 300 tokens
        let contexts = (0..10)
            .map(|i| context(&format!("k{i}"), &big, 0.9, &[]))
            .collect();

        let out = apply_token_budget(contexts, 1500, 200, true);
        assert_eq!(out.contexts.len(), 7);
        assert_eq!(out.summarized, 10);
        assert_eq!(out.dropped, 3);
        assert!(out.total_tokens <= 1500);
        assert!(out.contexts.iter().all(|c| estimate_tokens(&c.content) <= 200));
        assert!(out.contexts[0].description.ends_with(SUMMARIZED_SUFFIX));
    }

    #[test]
    fn budget_skips_oversized_and_continues() {
        let contexts = vec![
            context("big", &"d".repeat(80), 0.9, &[]),   // 20 tokens
            context("small", &"e".repeat(20), 0.5, &[]), // 5 tokens
        ];
        let out = apply_token_budget(contexts, 10, 100, false);
        assert_eq!(out.contexts.len(), 1);
        assert_eq!(out.contexts[0].id, "small");
    }
}
