//! Multi-factor relevance scoring of candidate sections.
//!
//! score = w_keyword * sum(keyword weights found)
//!       + w_entity * sum(entity confidences found)
//!       + w_intent * intent match
//!       + w_proximity * (1 if the file was explicitly named)
//!       + 0.3 * interim score
//!
//! clamped to [0, 1].

use std::collections::HashSet;
use std::path::PathBuf;

use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::signals::{Signals, task_type_preferred_kinds};
use crate::core::task::{CodeSection, SectionKind, TaskType};

/// Intent match score for a preferred section kind
pub const PREFERRED_KIND_SCORE: f32 = 0.8;

/// Intent match score for any other kind
pub const OTHER_KIND_SCORE: f32 = 0.3;

/// Weight of the extractor's interim score
pub const INTERIM_WEIGHT: f32 = 0.3;

/// Relevance weight vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights
{
    pub keyword: f32,
    pub entity: f32,
    pub intent: f32,
    pub proximity: f32,
}

impl Default for ScoringWeights
{
    fn default() -> Self
    {
        Self {
            keyword: 0.3,
            entity: 0.3,
            intent: 0.2,
            proximity: 0.05,
        }
    }
}

/// Case-insensitive presence test for a fixed set of weighted terms
#[derive(Debug, Clone)]
pub struct TermMatcher
{
    automaton: AhoCorasick,
    weights: Vec<f32>,
}

impl TermMatcher
{
    /// Empty terms are dropped; they would match everywhere
    pub fn new<'a, I>(terms: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, f32)>,
    {
        let (patterns, weights): (Vec<&str>, Vec<f32>) = terms
            .into_iter()
            .filter(|(t, _)| {
                !t.trim()
                    .is_empty()
            })
            .unzip();

        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&patterns)
            .context("build term matcher")?;

        Ok(Self { automaton, weights })
    }

    pub fn is_empty(&self) -> bool
    {
        self.weights
            .is_empty()
    }

    /// Indexes of the distinct terms occurring in `haystack`
    pub fn present(
        &self,
        haystack: &str,
    ) -> Vec<usize>
    {
        if self.is_empty()
        {
            return Vec::new();
        }

        let mut seen = vec![false; self.weights.len()];
        for m in self
            .automaton
            .find_overlapping_iter(haystack)
        {
            seen[m
                .pattern()
                .as_usize()] = true;
        }

        seen.iter()
            .enumerate()
            .filter_map(|(i, hit)| hit.then_some(i))
            .collect()
    }

    /// Sum of weights of the distinct terms present
    pub fn weight_sum(
        &self,
        haystack: &str,
    ) -> f32
    {
        self.present(haystack)
            .into_iter()
            .map(|i| self.weights[i])
            .sum()
    }

    pub fn weight(
        &self,
        index: usize,
    ) -> f32
    {
        self.weights
            .get(index)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Section kinds preferred for this run: the classified intent's list,
/// or the task type's when no intent was classified
pub fn preferred_kinds(
    signals: &Signals,
    task_type: TaskType,
) -> &'static [SectionKind]
{
    signals
        .intent
        .preferred_kinds()
        .unwrap_or_else(|| task_type_preferred_kinds(task_type))
}

pub fn intent_match_score(
    kind: SectionKind,
    preferred: &[SectionKind],
) -> f32
{
    if preferred.contains(&kind) { PREFERRED_KIND_SCORE } else { OTHER_KIND_SCORE }
}

fn unit(x: f32) -> f32
{
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

pub struct RelevanceScorer
{
    weights: ScoringWeights,
    keywords: TermMatcher,
    entities: TermMatcher,
    /// Lowercased entity names, index-aligned with `entities`
    entity_names: Vec<String>,
    preferred: &'static [SectionKind],
    explicit_files: HashSet<PathBuf>,
}

impl RelevanceScorer
{
    /// `explicit_files` are root-relative paths the reporter named
    pub fn new(
        weights: ScoringWeights,
        signals: &Signals,
        task_type: TaskType,
        explicit_files: &[PathBuf],
    ) -> Result<Self>
    {
        let keywords = TermMatcher::new(
            signals
                .keywords
                .iter()
                .map(|k| (k.term.as_str(), k.weight)),
        )?;

        let named: Vec<(&str, f32)> = signals
            .entities
            .iter()
            .map(|e| (e.name.as_str(), e.confidence))
            .filter(|(n, _)| {
                !n.trim()
                    .is_empty()
            })
            .collect();
        let entities = TermMatcher::new(named.iter().copied())?;
        let entity_names = named
            .iter()
            .map(|(n, _)| n.to_lowercase())
            .collect();

        Ok(Self {
            weights,
            keywords,
            entities,
            entity_names,
            preferred: preferred_kinds(signals, task_type),
            explicit_files: explicit_files
                .iter()
                .cloned()
                .collect(),
        })
    }

    /// Entity contribution: confidences of entities found in the content
    /// or listed among the section's related entities, each counted once
    fn entity_sum(
        &self,
        section: &CodeSection,
    ) -> f32
    {
        let mut hits: HashSet<usize> = self
            .entities
            .present(&section.content)
            .into_iter()
            .collect();

        for related in &section.related_entities
        {
            let related = related.to_lowercase();
            if let Some(i) = self
                .entity_names
                .iter()
                .position(|n| *n == related)
            {
                hits.insert(i);
            }
        }

        hits.into_iter()
            .map(|i| {
                self.entities
                    .weight(i)
            })
            .sum()
    }

    /// Final relevance of one section, always within [0, 1]
    pub fn score(
        &self,
        section: &CodeSection,
    ) -> f32
    {
        let w = &self.weights;
        let proximity = if self
            .explicit_files
            .contains(&section.file_path)
        {
            1.0
        }
        else
        {
            0.0
        };

        let raw = w.keyword
            * self
                .keywords
                .weight_sum(&section.content)
            + w.entity * self.entity_sum(section)
            + w.intent * intent_match_score(section.kind, self.preferred)
            + w.proximity * proximity
            + INTERIM_WEIGHT * unit(section.score);

        unit(raw)
    }

    /// Replace each interim score with the final score and sort descending.
    /// The sort is stable, so ties keep extraction order.
    pub fn rank(
        &self,
        mut sections: Vec<CodeSection>,
    ) -> Vec<CodeSection>
    {
        for s in &mut sections
        {
            s.score = self.score(s);
        }
        sections.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
        });
        sections
    }
}

#[cfg(test)]
mod tests
{
    use std::path::Path;

    use super::*;
    use crate::core::signals::{Entity, EntityKind, Intent, Keyword};

    fn signals(intent: Intent) -> Signals
    {
        Signals {
            keywords: vec![
                Keyword {
                    term: "login".into(),
                    weight: 1.0,
                },
                Keyword {
                    term: "session".into(),
                    weight: 0.5,
                },
            ],
            entities: vec![Entity {
                name: "validateToken".into(),
                kind: EntityKind::Function,
                confidence: 0.8,
            }],
            intent,
            text: String::new(),
            weighted: true,
        }
    }

    fn section(
        content: &str,
        kind: SectionKind,
    ) -> CodeSection
    {
        CodeSection {
            file_path: PathBuf::from("src/auth.js"),
            start_line: 1,
            end_line: 3,
            content: content.into(),
            score: 0.0,
            kind,
            related_entities: Vec::new(),
        }
    }

    #[test]
    fn combines_every_factor()
    {
        let scorer = RelevanceScorer::new(
            ScoringWeights::default(),
            &signals(Intent::Debug),
            TaskType::Bug,
            &[PathBuf::from("src/auth.js")],
        )
        .unwrap();

        let mut s = section("function LOGIN() { validatetoken(t) }", SectionKind::Function);
        s.score = 0.5;

        // 0.3*1.0 + 0.3*0.8 + 0.2*0.8 + 0.05*1 + 0.3*0.5
        let expected = 0.3 + 0.24 + 0.16 + 0.05 + 0.15;
        assert!((scorer.score(&s) - expected).abs() < 1e-5);
    }

    #[test]
    fn related_entities_count_once()
    {
        let scorer =
            RelevanceScorer::new(ScoringWeights::default(), &signals(Intent::Unknown), TaskType::Feature, &[])
                .unwrap();

        let mut s = section("validateToken()", SectionKind::Import);
        s.related_entities = vec!["VALIDATETOKEN".into()];

        // entity 0.3*0.8 once; Import is preferred for features
        let expected = 0.24 + 0.2 * PREFERRED_KIND_SCORE;
        assert!((scorer.score(&s) - expected).abs() < 1e-5);
    }

    #[test]
    fn intent_falls_back_to_task_type()
    {
        let sig = signals(Intent::Unknown);
        assert_eq!(preferred_kinds(&sig, TaskType::Bug), task_type_preferred_kinds(TaskType::Bug));

        let sig = signals(Intent::Document);
        assert_eq!(intent_match_score(SectionKind::Comment, preferred_kinds(&sig, TaskType::Bug)), 0.8);
        assert_eq!(intent_match_score(SectionKind::Import, preferred_kinds(&sig, TaskType::Bug)), 0.3);
    }

    #[test]
    fn score_is_clamped()
    {
        let weights = ScoringWeights {
            keyword: 1.0,
            entity: 1.0,
            intent: 1.0,
            proximity: 1.0,
        };
        let scorer = RelevanceScorer::new(weights, &signals(Intent::Debug), TaskType::Bug, &[]).unwrap();
        let s = section("login session validateToken", SectionKind::Usage);
        assert_eq!(scorer.score(&s), 1.0);
    }

    #[test]
    fn rank_orders_descending_and_keeps_ties_stable()
    {
        let scorer =
            RelevanceScorer::new(ScoringWeights::default(), &signals(Intent::Debug), TaskType::Bug, &[]).unwrap();

        let mut a = section("nothing here", SectionKind::Usage);
        a.file_path = Path::new("a.js").into();
        let mut b = section("login", SectionKind::Usage);
        b.file_path = Path::new("b.js").into();
        let mut c = section("nothing either", SectionKind::Usage);
        c.file_path = Path::new("c.js").into();

        let ranked = scorer.rank(vec![a, b, c]);
        let order: Vec<_> = ranked
            .iter()
            .map(|s| {
                s.file_path
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(order, vec!["b.js", "a.js", "c.js"]);
    }

    #[test]
    fn empty_matcher_finds_nothing()
    {
        let m = TermMatcher::new(std::iter::empty()).unwrap();
        assert!(m.is_empty());
        assert_eq!(m.weight_sum("anything"), 0.0);
    }
}
