//! Candidate section extraction.
//!
//! Turns pattern matches, import statements, stack frames, explicitly
//! named files and similar-text windows into [`CodeSection`]s. Every read
//! goes through the [`PathGuard`] and the size bound; a file that cannot be
//! resolved or read yields no section and the run continues.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use tracing::{debug, instrument, trace};

use crate::core::dependencies::ImportStatement;
use crate::core::definitions::DefinitionKind;
use crate::core::patterns::{PatternMatch, SimilarMatch};
use crate::core::scoring::TermMatcher;
use crate::core::signals::Signals;
use crate::core::stack_trace::ParsedStackTrace;
use crate::core::task::{CodeSection, SectionKind};
use crate::infra::io::{FileContent, read_bounded, slice_lines, window_around};
use crate::infra::paths::{PathGuard, ResolvedPath};

/// Interim score of a definition match
pub const PATTERN_SCORE: f32 = 0.8;

/// Interim score of an import line
pub const IMPORT_SCORE: f32 = 0.4;

/// Frames below this relevance produce no section
pub const FRAME_RELEVANCE_GATE: f32 = 0.35;

/// Line-score increment per keyword hit when keywords carry no weight
pub const KEYWORD_HIT: f32 = 0.1;

/// Line-score increment per entity hit
pub const ENTITY_HIT: f32 = 0.3;

/// A run of hit lines merged for one usage section
#[derive(Debug, Clone, PartialEq)]
pub struct HitGroup
{
    /// 1-based inclusive bounds after padding
    pub start_line: usize,
    pub end_line: usize,
    /// Mean of member line scores
    pub score: f32,
    /// 1-based hit lines inside the group
    pub lines: Vec<usize>,
}

/// Merge hits (line, score) whose gap is at most `2 * context_size`, then
/// pad each group by `context_size` lines clamped to `[1, total_lines]`
pub fn group_hits(
    hits: &[(usize, f32)],
    context_size: usize,
    total_lines: usize,
) -> Vec<HitGroup>
{
    let mut sorted: Vec<(usize, f32)> = hits.to_vec();
    sorted.sort_by_key(|(line, _)| *line);

    let max_gap = context_size.saturating_mul(2);
    let mut runs: Vec<Vec<(usize, f32)>> = Vec::new();
    for hit in sorted
    {
        match runs.last_mut()
        {
            Some(run)
                if run
                    .last()
                    .is_some_and(|(prev, _)| hit.0 - prev <= max_gap) =>
            {
                run.push(hit)
            }
            _ => runs.push(vec![hit]),
        }
    }

    runs.into_iter()
        .filter_map(|run| {
            let first = run.first()?.0;
            let last = run.last()?.0;
            let score = run
                .iter()
                .map(|(_, s)| s)
                .sum::<f32>()
                / run.len() as f32;
            Some(HitGroup {
                start_line: first
                    .saturating_sub(context_size)
                    .max(1),
                end_line: (last + context_size).min(total_lines.max(1)),
                score,
                lines: run
                    .into_iter()
                    .map(|(l, _)| l)
                    .collect(),
            })
        })
        .collect()
}

/// Line comment or block-comment line in the common C-like, hash and
/// dash comment syntaxes
pub fn is_comment_line(line: &str) -> bool
{
    let t = line.trim_start();
    if t.starts_with("#include")
        || t.starts_with("#define")
        || t.starts_with("#[")
        || t.starts_with("#!")
    {
        return false;
    }
    ["//", "/*", "*", "#", "--", "<!--", "\"\"\"", "'''"]
        .iter()
        .any(|p| t.starts_with(p))
}

pub struct SectionExtractor<'a>
{
    guard: &'a PathGuard,
    max_file_size: u64,
    context_size: usize,
    frame_window: usize,
    keywords: TermMatcher,
    entities: TermMatcher,
    /// Entity names, index-aligned with `entities`
    entity_names: Vec<String>,
    weighted: bool,
}

impl<'a> SectionExtractor<'a>
{
    pub fn new(
        guard: &'a PathGuard,
        signals: &Signals,
        max_file_size: u64,
        context_size: usize,
        frame_window: usize,
    ) -> Result<Self>
    {
        let keywords = TermMatcher::new(
            signals
                .keywords
                .iter()
                .map(|k| (k.term.as_str(), k.weight)),
        )?;

        let named: Vec<&str> = signals
            .entity_names()
            .filter(|n| {
                !n.trim()
                    .is_empty()
            })
            .collect();
        let entities = TermMatcher::new(
            named
                .iter()
                .map(|n| (*n, ENTITY_HIT)),
        )?;

        Ok(Self {
            guard,
            max_file_size,
            context_size,
            frame_window,
            keywords,
            entities,
            entity_names: named
                .iter()
                .map(|n| n.to_string())
                .collect(),
            weighted: signals.weighted,
        })
    }

    /// Guarded, size-bounded read; failures are logged and swallowed
    fn read(
        &self,
        file: &ResolvedPath,
    ) -> Option<FileContent>
    {
        match read_bounded(&file.absolute, self.max_file_size)
        {
            Ok(content) => Some(content),
            Err(e) =>
            {
                debug!(file = %file.relative.display(), error = %e, "skipping unreadable file");
                None
            }
        }
    }

    fn resolve_and_read(
        &self,
        relative: &Path,
    ) -> Option<(ResolvedPath, FileContent)>
    {
        let Some(file) = self
            .guard
            .resolve(relative)
        else
        {
            trace!(file = %relative.display(), "path rejected by guard");
            return None;
        };
        let content = self.read(&file)?;
        Some((file, content))
    }

    /// One section per definition match, spanning its recorded lines
    #[instrument(level = "debug", skip_all, fields(matches = matches.len()))]
    pub fn from_patterns(
        &self,
        matches: &[PatternMatch],
    ) -> Vec<CodeSection>
    {
        matches
            .iter()
            .filter_map(|m| {
                let (file, content) = self.resolve_and_read(&m.file_path)?;
                let (start, end, body) = slice_lines(content.as_ref(), m.start_line, m.end_line)?;

                let kind = match m.kind
                {
                    DefinitionKind::Function => SectionKind::Function,
                    DefinitionKind::Class => SectionKind::Class,
                };
                let mut related = vec![
                    m.entity
                        .clone(),
                ];
                related.extend(
                    m.members
                        .iter()
                        .cloned(),
                );

                Some(CodeSection {
                    file_path: file.relative,
                    start_line: start,
                    end_line: end,
                    content: body,
                    score: PATTERN_SCORE,
                    kind,
                    related_entities: related,
                })
            })
            .collect()
    }

    /// One-to-two-line import sections for `file`. The following line is
    /// included when the statement visibly continues onto it.
    pub fn from_imports(
        &self,
        file: &ResolvedPath,
        imports: &[ImportStatement],
    ) -> Vec<CodeSection>
    {
        if imports.is_empty()
        {
            return Vec::new();
        }
        let Some(content) = self.read(file)
        else
        {
            return Vec::new();
        };
        let text = content.as_ref();
        let lines: Vec<&str> = text
            .lines()
            .collect();

        imports
            .iter()
            .filter_map(|imp| {
                let line = *lines.get(imp.line.checked_sub(1)?)?;
                let trimmed = line.trim_end();
                let continues = trimmed.ends_with('{')
                    || trimmed.ends_with('(')
                    || trimmed.ends_with(',')
                    || trimmed.ends_with('\\');
                let end = if continues { imp.line + 1 } else { imp.line };
                let (start, end, body) = slice_lines(text, imp.line, end)?;

                Some(CodeSection {
                    file_path: file
                        .relative
                        .clone(),
                    start_line: start,
                    end_line: end,
                    content: body,
                    score: IMPORT_SCORE,
                    kind: SectionKind::Import,
                    related_entities: imp
                        .symbols
                        .clone(),
                })
            })
            .collect()
    }

    /// Locate a frame's file: guarded loose resolution first, then the
    /// longest component-suffix match among the walked files
    fn locate_frame_file(
        &self,
        frame_file: &str,
        walked: &[ResolvedPath],
    ) -> Option<ResolvedPath>
    {
        let requested = Path::new(frame_file);
        if let Some(found) = self
            .guard
            .resolve_loose(requested)
        {
            return Some(found);
        }

        let wanted: Vec<&std::ffi::OsStr> = requested
            .components()
            .filter_map(|c| {
                match c
                {
                    Component::Normal(s) => Some(s),
                    _ => None,
                }
            })
            .collect();
        if wanted.is_empty()
        {
            return None;
        }

        walked
            .iter()
            .map(|f| {
                let have: Vec<&std::ffi::OsStr> = f
                    .relative
                    .components()
                    .map(|c| c.as_os_str())
                    .collect();
                let shared = wanted
                    .iter()
                    .rev()
                    .zip(have.iter().rev())
                    .take_while(|(a, b)| a == b)
                    .count();
                (shared, f)
            })
            .filter(|(shared, _)| *shared > 0)
            // max_by_key keeps the last maximum; reverse to prefer the first path
            .rev()
            .max_by_key(|(shared, _)| *shared)
            .map(|(_, f)| f.clone())
    }

    /// Window of ±`frame_window` lines around each gated frame.
    /// Frames repeated across traces yield one section.
    #[instrument(level = "debug", skip_all, fields(traces = traces.len()))]
    pub fn from_frames(
        &self,
        traces: &[ParsedStackTrace],
        walked: &[ResolvedPath],
    ) -> Vec<CodeSection>
    {
        let mut seen: HashSet<(PathBuf, usize)> = HashSet::new();
        let mut out = Vec::new();

        for frame in traces
            .iter()
            .flat_map(|t| t.frames.iter())
        {
            if frame.relevance < FRAME_RELEVANCE_GATE
            {
                continue;
            }
            let Some(file) = self.locate_frame_file(&frame.file, walked)
            else
            {
                debug!(frame = %frame.file, "frame file not found under root");
                continue;
            };
            if !seen.insert((file.relative.clone(), frame.line))
            {
                continue;
            }
            let Some(content) = self.read(&file)
            else
            {
                continue;
            };
            let Some((start, end, body)) = window_around(content.as_ref(), frame.line, self.frame_window)
            else
            {
                continue;
            };

            out.push(CodeSection {
                file_path: file.relative,
                start_line: start,
                end_line: end,
                content: body,
                score: frame.relevance,
                kind: SectionKind::Function,
                related_entities: frame
                    .function
                    .iter()
                    .cloned()
                    .collect(),
            });
        }

        out
    }

    /// Keyword/entity score of one line, clamped to 1
    fn line_score(
        &self,
        line: &str,
    ) -> (f32, Vec<usize>)
    {
        let keyword_score: f32 = if self.weighted
        {
            self.keywords
                .weight_sum(line)
        }
        else
        {
            KEYWORD_HIT
                * self
                    .keywords
                    .present(line)
                    .len() as f32
        };

        let entity_hits = self
            .entities
            .present(line);
        let score = keyword_score + ENTITY_HIT * entity_hits.len() as f32;
        (score.min(1.0), entity_hits)
    }

    /// Usage (or comment) sections from a full line scan of each named file
    /// not already covered by another section
    #[instrument(level = "debug", skip_all, fields(files = files.len()))]
    pub fn from_named_files(
        &self,
        files: &[ResolvedPath],
        covered: &HashSet<PathBuf>,
    ) -> Vec<CodeSection>
    {
        let mut out = Vec::new();

        for file in files
        {
            if covered.contains(&file.relative)
            {
                continue;
            }
            let Some(content) = self.read(file)
            else
            {
                continue;
            };
            let text = content.as_ref();
            let lines: Vec<&str> = text
                .lines()
                .collect();

            let mut hits: Vec<(usize, f32)> = Vec::new();
            let mut entity_hits: Vec<(usize, Vec<usize>)> = Vec::new();
            for (i, line) in lines
                .iter()
                .enumerate()
            {
                let (score, entities) = self.line_score(line);
                if score > 0.0
                {
                    hits.push((i + 1, score));
                    entity_hits.push((i + 1, entities));
                }
            }
            trace!(file = %file.relative.display(), hits = hits.len(), "line scan");

            for group in group_hits(&hits, self.context_size, lines.len())
            {
                let Some((start, end, body)) = slice_lines(text, group.start_line, group.end_line)
                else
                {
                    continue;
                };

                let comments = group
                    .lines
                    .iter()
                    .filter(|&&l| is_comment_line(lines[l - 1]))
                    .count();
                let kind = if comments * 2 > group
                    .lines
                    .len()
                {
                    SectionKind::Comment
                }
                else
                {
                    SectionKind::Usage
                };

                let mut related: Vec<String> = Vec::new();
                for (_, ids) in entity_hits
                    .iter()
                    .filter(|(l, _)| group.lines.contains(l))
                {
                    for &id in ids
                    {
                        let name = &self.entity_names[id];
                        if !related.contains(name)
                        {
                            related.push(name.clone());
                        }
                    }
                }

                out.push(CodeSection {
                    file_path: file
                        .relative
                        .clone(),
                    start_line: start,
                    end_line: end,
                    content: body,
                    score: group.score,
                    kind,
                    related_entities: related,
                });
            }
        }

        out
    }

    /// Usage sections for similar-text windows, scored by similarity
    pub fn from_similar(
        &self,
        matches: &[SimilarMatch],
    ) -> Vec<CodeSection>
    {
        matches
            .iter()
            .filter_map(|m| {
                let (file, content) = self.resolve_and_read(&m.file_path)?;
                let (start, end, body) = slice_lines(content.as_ref(), m.start_line, m.end_line)?;
                Some(CodeSection {
                    file_path: file.relative,
                    start_line: start,
                    end_line: end,
                    content: body,
                    score: m
                        .similarity
                        .clamp(0.0, 1.0),
                    kind: SectionKind::Usage,
                    related_entities: Vec::new(),
                })
            })
            .collect()
    }
}
