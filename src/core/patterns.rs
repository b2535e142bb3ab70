//! Pattern search: definition lookup per entity and similar-section search.
//!
//! Both are best-effort heuristics. Candidate files are pre-filtered with
//! `grep-searcher` so only files mentioning an entity are parsed; callers
//! must tolerate empty results.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use grep_regex::{RegexMatcher, RegexMatcherBuilder};
use grep_searcher::{BinaryDetection, Searcher, SearcherBuilder, Sink, SinkMatch};
use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::core::definitions::{DefinitionKind, Extractors};
use crate::core::signals::{Entity, EntityKind};
use crate::infra::io::read_bounded;
use crate::infra::paths::ResolvedPath;

/// Lines per similarity window
const WINDOW_LINES: usize = 20;

/// Stride between similarity windows
const WINDOW_STEP: usize = 10;

/// Similar sections kept per file, and overall
const SIMILAR_PER_FILE: usize = 2;
const SIMILAR_TOTAL: usize = 10;

/// How an entity is looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRoute
{
    Function,
    Class,
    /// Files and non-identifiers are not definition candidates
    Skip,
}

impl EntityRoute
{
    fn definition_kind(self) -> Option<DefinitionKind>
    {
        match self
        {
            EntityRoute::Function => Some(DefinitionKind::Function),
            EntityRoute::Class => Some(DefinitionKind::Class),
            EntityRoute::Skip => None,
        }
    }
}

fn is_identifier(s: &str) -> bool
{
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Parenthesized or lower-case identifiers are functions; capitalized ones classes
pub fn route_entity(entity: &Entity) -> EntityRoute
{
    if entity.kind == EntityKind::File
    {
        return EntityRoute::Skip;
    }

    let name = entity
        .name
        .trim();
    let bare = name
        .split('(')
        .next()
        .unwrap_or(name)
        .trim();
    if !is_identifier(bare)
    {
        return EntityRoute::Skip;
    }

    if name.contains('(') || entity.kind == EntityKind::Function
    {
        EntityRoute::Function
    }
    else if bare.starts_with(|c: char| c.is_uppercase())
    {
        EntityRoute::Class
    }
    else
    {
        EntityRoute::Function
    }
}

/// A definition found for an entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternMatch
{
    /// Entity that led here
    pub entity: String,
    pub name: String,
    pub kind: DefinitionKind,
    /// Root-relative path
    pub file_path: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    /// Member names, for classes
    pub members: Vec<String>,
}

/// A window textually similar to the task text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarMatch
{
    pub file_path: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    /// Share of task tokens present in the window, in [0, 1]
    pub similarity: f32,
}

/// Collects matching line numbers
struct LineHits
{
    lines: Vec<usize>,
    limit: usize,
}

impl Sink for LineHits
{
    type Error = std::io::Error;

    fn matched(
        &mut self,
        _searcher: &Searcher,
        mat: &SinkMatch<'_>,
    ) -> Result<bool, Self::Error>
    {
        self.lines
            .push(
                mat.line_number()
                    .unwrap_or(1) as usize,
            );
        Ok(self
            .lines
            .len()
            < self.limit)
    }
}

/// Lowercased identifier-like tokens of at least three characters
pub fn identifier_tokens(text: &str) -> HashSet<String>
{
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.len() >= 3)
        .filter(|t| {
            !t.chars()
                .all(|c| c.is_ascii_digit())
        })
        .map(str::to_lowercase)
        .collect()
}

pub struct PatternMatcher
{
    extractors: Extractors,
    max_file_size: u64,
    max_per_entity: usize,
    similarity_threshold: f32,
}

impl PatternMatcher
{
    pub fn new(
        max_file_size: u64,
        max_per_entity: usize,
        similarity_threshold: f32,
    ) -> Result<Self>
    {
        Ok(Self {
            extractors: Extractors::new()?,
            max_file_size,
            max_per_entity,
            similarity_threshold,
        })
    }

    /// Lines in `path` matching `matcher` (first `limit` only)
    fn grep_lines(
        &self,
        matcher: &RegexMatcher,
        path: &Path,
        limit: usize,
    ) -> Vec<usize>
    {
        let mut sink = LineHits {
            lines: Vec::new(),
            limit,
        };
        let mut searcher = SearcherBuilder::new()
            .binary_detection(BinaryDetection::quit(b'\x00'))
            .line_number(true)
            .build();

        if let Err(e) = searcher.search_path(matcher, path, &mut sink)
        {
            debug!(path = %path.display(), error = %e, "grep failed; skipping file");
            return Vec::new();
        }
        sink.lines
    }

    fn within_size(
        &self,
        path: &Path,
    ) -> bool
    {
        std::fs::metadata(path).is_ok_and(|m| m.len() <= self.max_file_size)
    }

    /// Definitions of `entity` across `files`, capped per entity
    #[instrument(level = "debug", skip(self, files), fields(files = files.len()))]
    pub fn find_definitions(
        &self,
        entity: &Entity,
        files: &[ResolvedPath],
    ) -> Vec<PatternMatch>
    {
        let route = route_entity(entity);
        let Some(kind) = route.definition_kind()
        else
        {
            return Vec::new();
        };

        let name = entity
            .name
            .split('(')
            .next()
            .unwrap_or(&entity.name)
            .trim()
            .to_string();

        let matcher = match RegexMatcherBuilder::new()
            .word(true)
            .build(&regex::escape(&name))
        {
            Ok(m) => m,
            Err(e) =>
            {
                debug!(entity = %name, error = %e, "cannot build matcher");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for file in files
        {
            if out.len() >= self.max_per_entity
            {
                break;
            }
            if !self.within_size(&file.absolute)
                || self
                    .grep_lines(&matcher, &file.absolute, 1)
                    .is_empty()
            {
                continue;
            }

            let content = match read_bounded(&file.absolute, self.max_file_size)
            {
                Ok(c) => c,
                Err(e) =>
                {
                    debug!(error = %e, "skipping file");
                    continue;
                }
            };

            for def in self
                .extractors
                .definitions(&file.relative, content.as_ref())
            {
                if def.kind != kind || def.name != name
                {
                    continue;
                }
                trace!(file = %file.relative.display(), line = def.start_line, "definition match");
                out.push(PatternMatch {
                    entity: entity
                        .name
                        .clone(),
                    name: def.name,
                    kind: def.kind,
                    file_path: file
                        .relative
                        .clone(),
                    start_line: def.start_line,
                    end_line: def.end_line,
                    members: def.members,
                });
                if out.len() >= self.max_per_entity
                {
                    break;
                }
            }
        }

        debug!(entity = %name, matches = out.len(), "definition lookup done");
        out
    }

    /// Windows whose identifier tokens cover at least the threshold share
    /// of the text's tokens, best first
    #[instrument(level = "debug", skip_all, fields(files = files.len()))]
    pub fn find_similar(
        &self,
        text: &str,
        files: &[ResolvedPath],
    ) -> Vec<SimilarMatch>
    {
        let wanted = identifier_tokens(text);
        if wanted.is_empty()
        {
            return Vec::new();
        }

        let mut out = Vec::new();
        for file in files
        {
            let content = match read_bounded(&file.absolute, self.max_file_size)
            {
                Ok(c) => c,
                Err(e) =>
                {
                    trace!(error = %e, "skipping file");
                    continue;
                }
            };
            let lines: Vec<&str> = content
                .as_ref()
                .lines()
                .collect();

            let mut per_file: Vec<SimilarMatch> = Vec::new();
            let mut start = 0;
            while start < lines.len()
            {
                let end = (start + WINDOW_LINES).min(lines.len());
                let window = identifier_tokens(&lines[start..end].join("\n"));
                let shared = wanted
                    .iter()
                    .filter(|t| window.contains(*t))
                    .count();
                let similarity = shared as f32 / wanted.len() as f32;

                if similarity >= self.similarity_threshold && shared > 0
                {
                    per_file.push(SimilarMatch {
                        file_path: file
                            .relative
                            .clone(),
                        start_line: start + 1,
                        end_line: end,
                        similarity,
                    });
                }

                if end == lines.len()
                {
                    break;
                }
                start += WINDOW_STEP;
            }

            // Best windows first; drop windows overlapping a better one
            per_file.sort_by(|a, b| {
                b.similarity
                    .total_cmp(&a.similarity)
            });
            let mut kept: Vec<SimilarMatch> = Vec::new();
            for m in per_file
            {
                if kept.len() >= SIMILAR_PER_FILE
                {
                    break;
                }
                if kept
                    .iter()
                    .all(|k| m.end_line < k.start_line || m.start_line > k.end_line)
                {
                    kept.push(m);
                }
            }
            out.extend(kept);
        }

        out.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
        });
        out.truncate(SIMILAR_TOTAL);
        out
    }
}
