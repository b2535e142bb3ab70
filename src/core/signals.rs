//! Signal extraction: keywords, entities, and intent from task text.
//!
//! Two extractors sit behind [`SignalExtractor`]:
//! - [`ScoredExtractor`] weights terms by frequency with an identifier
//!   bonus, assigns entity confidences by kind, and classifies intent
//!   from cue words.
//! - [`FallbackExtractor`] is the degraded path: lowercase, strip
//!   punctuation, drop short tokens and stopwords, keep the first N
//!   unique survivors; entities come from three independent regexes.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::task::{SectionKind, TaskAnalysisInput, TaskType};

/// Keywords and entities are capped at this many
pub const MAX_SIGNALS: usize = 20;

/// Derived term with a weight in (0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword
{
    pub term: String,
    pub weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind
{
    File,
    Function,
    Class,
    Variable,
}

impl EntityKind
{
    /// Confidence the scored extractor assigns to each kind
    pub fn confidence(self) -> f32
    {
        match self
        {
            EntityKind::File => 0.9,
            EntityKind::Function => 0.8,
            EntityKind::Class => 0.7,
            EntityKind::Variable => 0.5,
        }
    }
}

/// Named code artifact mentioned in the task text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity
{
    pub name: String,
    pub kind: EntityKind,
    pub confidence: f32,
}

/// What the reporter is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent
{
    Debug,
    Implement,
    Refactor,
    Optimize,
    Test,
    Document,
    Unknown,
}

impl Intent
{
    /// Section kinds preferred for this intent; `None` defers to task type
    pub fn preferred_kinds(self) -> Option<&'static [SectionKind]>
    {
        use SectionKind::*;
        match self
        {
            Intent::Debug => Some(&[Function, Usage, Comment]),
            Intent::Implement => Some(&[Class, Function, Import]),
            Intent::Refactor => Some(&[Function, Class, Usage]),
            Intent::Optimize => Some(&[Function, Usage]),
            Intent::Test => Some(&[Function, Usage]),
            Intent::Document => Some(&[Comment, Class, Function]),
            Intent::Unknown => None,
        }
    }

    fn cues(self) -> &'static [&'static str]
    {
        match self
        {
            Intent::Debug => &[
                "bug", "error", "crash", "crashes", "fail", "fails", "failing", "failure", "broken",
                "exception", "fix", "wrong", "panic", "traceback", "undefined", "null", "regression",
            ],
            Intent::Implement => &[
                "add", "implement", "create", "support", "new", "feature", "introduce", "allow",
                "enable",
            ],
            Intent::Refactor => &[
                "refactor", "cleanup", "clean", "restructure", "rename", "simplify", "reorganize",
                "extract", "duplicate", "duplication",
            ],
            Intent::Optimize => &[
                "slow", "performance", "optimize", "speed", "latency", "memory", "faster", "cache",
                "efficient", "throughput",
            ],
            Intent::Test => &["test", "tests", "testing", "coverage", "assert", "flaky", "mock"],
            Intent::Document => &[
                "document", "docs", "documentation", "readme", "comment", "comments", "explain",
                "docstring",
            ],
            Intent::Unknown => &[],
        }
    }

    const CLASSIFIED: [Intent; 6] = [
        Intent::Debug,
        Intent::Implement,
        Intent::Refactor,
        Intent::Optimize,
        Intent::Test,
        Intent::Document,
    ];
}

/// Section kinds preferred when no intent was classified
pub fn task_type_preferred_kinds(task_type: TaskType) -> &'static [SectionKind]
{
    use SectionKind::*;
    match task_type
    {
        TaskType::Bug => &[Function, Usage, Comment],
        TaskType::Feature => &[Class, Function, Import],
        TaskType::Improvement => &[Function, Class, Usage],
    }
}

/// Output of one extraction
#[derive(Debug, Clone, Serialize)]
pub struct Signals
{
    pub keywords: Vec<Keyword>,
    pub entities: Vec<Entity>,
    pub intent: Intent,

    /// Concatenated source text the signals came from
    pub text: String,

    /// False for the fallback path; line scoring then uses flat increments
    pub weighted: bool,
}

impl Signals
{
    /// Entities routed to the function/class matcher, in order
    pub fn entity_names(&self) -> impl Iterator<Item = &str>
    {
        self.entities
            .iter()
            .map(|e| e.name.as_str())
    }
}

pub trait SignalExtractor: Send + Sync
{
    fn extract(
        &self,
        input: &TaskAnalysisInput,
    ) -> Signals;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Words carrying no retrieval signal
const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "also", "because", "been", "before", "being", "below",
    "between", "both", "cannot", "could", "does", "doesn", "doing", "done", "down", "during",
    "each", "even", "every", "from", "further", "have", "having", "here", "instead", "into",
    "just", "like", "make", "makes", "more", "most", "much", "must", "need", "needs", "only",
    "other", "over", "really", "same", "should", "some", "such", "than", "that", "their", "them",
    "then", "there", "these", "they", "thing", "this", "those", "through", "under", "until",
    "very", "want", "were", "what", "when", "where", "which", "while", "will", "with", "would",
    "your", "shows", "seems", "still", "currently", "expected", "actual", "instead", "using",
];

fn is_stopword(term: &str) -> bool
{
    STOPWORDS.contains(&term)
}

/// The three entity regexes shared by both extractors
#[derive(Debug, Clone)]
struct EntityPatterns
{
    file: Regex,
    call: Regex,
    camel: Regex,
}

impl EntityPatterns
{
    fn new() -> Result<Self>
    {
        Ok(Self {
            file: Regex::new(
                r"[A-Za-z0-9_\-./]*[A-Za-z0-9_]\.(?:rs|py|jsx?|tsx?|java|go|c|h|cpp|hpp|cs|rb|php|kt|swift|scala|json|toml|ya?ml)\b",
            )?,
            call: Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\(")?,
            camel: Regex::new(r"\b(?:[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]*)+|[a-z][a-z0-9]*(?:[A-Z][a-z0-9]*)+)\b")?,
        })
    }

    /// Union of the three regexes, in text order per regex, capped
    fn find(
        &self,
        text: &str,
    ) -> Vec<(String, EntityKind)>
    {
        let mut out: IndexMap<String, EntityKind> = IndexMap::new();

        for m in self
            .file
            .find_iter(text)
        {
            let name = m
                .as_str()
                .trim_start_matches("./")
                .to_string();
            out.entry(name)
                .or_insert(EntityKind::File);
        }

        for caps in self
            .call
            .captures_iter(text)
        {
            let name = &caps[1];
            if is_control_keyword(name)
            {
                continue;
            }
            out.entry(name.to_string())
                .or_insert(EntityKind::Function);
        }

        for m in self
            .camel
            .find_iter(text)
        {
            let name = m.as_str();
            let kind = if name.starts_with(|c: char| c.is_ascii_uppercase())
            {
                EntityKind::Class
            }
            else
            {
                EntityKind::Variable
            };
            out.entry(name.to_string())
                .or_insert(kind);
        }

        out.into_iter()
            .take(MAX_SIGNALS)
            .collect()
    }
}

fn is_control_keyword(word: &str) -> bool
{
    matches!(
        word,
        "if" | "for" | "while" | "switch" | "catch" | "return" | "match" | "fn" | "function" | "def"
    )
}

/// Classify intent by counting cue words; ties go to the earlier intent
pub fn classify_intent(text: &str) -> Intent
{
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    let mut best = (Intent::Unknown, 0usize);
    for intent in Intent::CLASSIFIED
    {
        let cues = intent.cues();
        let hits = words
            .iter()
            .filter(|w| cues.contains(&w.as_str()))
            .count();
        if hits > best.1
        {
            best = (intent, hits);
        }
    }
    best.0
}

/// Guess the kind of a caller-supplied entity name
pub fn classify_entity(name: &str) -> EntityKind
{
    let trimmed = name.trim_end_matches("()");
    if trimmed.contains('.')
        && !trimmed.ends_with('.')
        && trimmed
            .rsplit('.')
            .next()
            .is_some_and(|ext| {
                (1..=5).contains(&ext.len())
                    && ext
                        .chars()
                        .all(|c| c.is_ascii_alphabetic())
            })
    {
        EntityKind::File
    }
    else if name.ends_with("()")
    {
        EntityKind::Function
    }
    else if trimmed.starts_with(|c: char| c.is_ascii_uppercase())
    {
        EntityKind::Class
    }
    else if trimmed.contains('_')
        || trimmed
            .chars()
            .any(|c| c.is_ascii_uppercase())
    {
        EntityKind::Variable
    }
    else
    {
        EntityKind::Function
    }
}

fn caller_entities(input: &TaskAnalysisInput) -> Vec<Entity>
{
    input
        .entities
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(|e| {
            Entity {
                name: e
                    .trim_end_matches("()")
                    .to_string(),
                kind: classify_entity(e),
                confidence: 1.0,
            }
        })
        .collect()
}

/// Merge caller entities ahead of derived ones, first name wins
fn merge_entities(
    caller: Vec<Entity>,
    derived: Vec<Entity>,
) -> Vec<Entity>
{
    let mut seen = HashSet::new();
    caller
        .into_iter()
        .chain(derived)
        .filter(|e| seen.insert(e.name.clone()))
        .take(MAX_SIGNALS)
        .collect()
}

/// Frequency-weighted extractor with identifier bonus and intent cues
#[derive(Debug, Clone)]
pub struct ScoredExtractor
{
    patterns: EntityPatterns,
    token: Regex,
}

impl ScoredExtractor
{
    pub fn new() -> Result<Self>
    {
        Ok(Self {
            patterns: EntityPatterns::new()?,
            token: Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(\()?")?,
        })
    }

    fn looks_like_identifier(raw: &str) -> bool
    {
        let body = raw.trim_end_matches('(');
        raw.ends_with('(')
            || body.contains('_')
            || body
                .chars()
                .skip(1)
                .any(|c| c.is_ascii_uppercase())
    }

    fn keywords(
        &self,
        text: &str,
        caller: &[String],
    ) -> Vec<Keyword>
    {
        // term -> (raw weight, first position)
        let mut scores: HashMap<String, (f32, usize)> = HashMap::new();

        for (pos, m) in self
            .token
            .find_iter(text)
            .enumerate()
        {
            let raw = m.as_str();
            let term = raw
                .trim_end_matches('(')
                .to_lowercase();
            if term.len() <= 3 || is_stopword(&term)
            {
                continue;
            }

            let bonus = if Self::looks_like_identifier(raw) { 1.0 } else { 0.0 };
            let slot = scores
                .entry(term)
                .or_insert((0.0, pos));
            slot.0 += 1.0 + bonus;
        }

        let max = scores
            .values()
            .map(|(w, _)| *w)
            .fold(0.0_f32, f32::max);

        let mut ranked: Vec<(String, f32, usize)> = scores
            .into_iter()
            .map(|(term, (w, pos))| (term, if max > 0.0 { w / max } else { 0.0 }, pos))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then(a.2.cmp(&b.2))
        });

        let mut seen = HashSet::new();
        caller
            .iter()
            .map(|k| {
                k.trim()
                    .to_lowercase()
            })
            .filter(|k| !k.is_empty())
            .map(|term| Keyword { term, weight: 1.0 })
            .chain(
                ranked
                    .into_iter()
                    .map(|(term, weight, _)| Keyword { term, weight }),
            )
            .filter(|k| seen.insert(k.term.clone()))
            .take(MAX_SIGNALS)
            .collect()
    }
}

impl SignalExtractor for ScoredExtractor
{
    fn extract(
        &self,
        input: &TaskAnalysisInput,
    ) -> Signals
    {
        let text = input.combined_text();
        let keywords = self.keywords(&text, &input.keywords);

        let derived = self
            .patterns
            .find(&text)
            .into_iter()
            .map(|(name, kind)| {
                Entity {
                    name,
                    kind,
                    confidence: kind.confidence(),
                }
            })
            .collect();

        Signals {
            keywords,
            entities: merge_entities(caller_entities(input), derived),
            intent: classify_intent(&text),
            text,
            weighted: true,
        }
    }

    fn name(&self) -> &'static str
    {
        "scored"
    }
}

/// Degraded extractor: first-N unique tokens and regex entities
#[derive(Debug, Clone)]
pub struct FallbackExtractor
{
    patterns: EntityPatterns,
    limit: usize,
}

impl FallbackExtractor
{
    pub fn new() -> Result<Self>
    {
        Ok(Self {
            patterns: EntityPatterns::new()?,
            limit: MAX_SIGNALS,
        })
    }

    /// Override the keyword cap
    pub fn with_limit(
        mut self,
        limit: usize,
    ) -> Self
    {
        self.limit = limit;
        self
    }

    /// Lowercase, strip punctuation, drop short tokens and stopwords,
    /// keep the first `limit` unique survivors
    pub fn keywords(
        &self,
        text: &str,
    ) -> Vec<String>
    {
        let cleaned: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' || c.is_whitespace() { c } else { ' ' })
            .collect();

        let mut seen = HashSet::new();
        cleaned
            .split_whitespace()
            .filter(|t| t.chars().count() > 3 && !is_stopword(t))
            .filter(|t| seen.insert(t.to_string()))
            .take(self.limit)
            .map(str::to_string)
            .collect()
    }
}

impl SignalExtractor for FallbackExtractor
{
    fn extract(
        &self,
        input: &TaskAnalysisInput,
    ) -> Signals
    {
        let text = input.combined_text();

        let mut seen = HashSet::new();
        let keywords = input
            .keywords
            .iter()
            .map(|k| {
                k.trim()
                    .to_lowercase()
            })
            .filter(|k| !k.is_empty())
            .chain(self.keywords(&text))
            .filter(|k| seen.insert(k.clone()))
            .take(self.limit)
            .map(|term| Keyword { term, weight: 1.0 })
            .collect();

        let derived = self
            .patterns
            .find(&text)
            .into_iter()
            .map(|(name, kind)| {
                Entity {
                    name,
                    kind,
                    confidence: 0.5,
                }
            })
            .collect();

        Signals {
            keywords,
            entities: merge_entities(caller_entities(input), derived),
            intent: Intent::Unknown,
            text,
            weighted: false,
        }
    }

    fn name(&self) -> &'static str
    {
        "fallback"
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn bug(description: &str) -> TaskAnalysisInput
    {
        TaskAnalysisInput::new("T-1", TaskType::Bug, "Login fails", description)
    }

    #[test]
    fn fallback_keywords_drop_short_tokens_and_stopwords()
    {
        let ex = FallbackExtractor::new().unwrap();
        let kws = ex.keywords("The login, when clicked, throws: login ERROR again and again!");
        assert_eq!(kws, vec!["login", "clicked", "throws", "error"]);
    }

    #[test]
    fn fallback_keywords_respect_limit()
    {
        let ex = FallbackExtractor::new()
            .unwrap()
            .with_limit(2);
        let kws = ex.keywords("alpha bravo charlie delta");
        assert_eq!(kws, vec!["alpha", "bravo"]);
    }

    #[test]
    fn fallback_entities_union_three_regexes()
    {
        let ex = FallbackExtractor::new().unwrap();
        let signals = ex.extract(&bug("processUser() in src/user.js throws TypeError"));
        let names: Vec<&str> = signals
            .entity_names()
            .collect();

        assert!(names.contains(&"src/user.js"));
        assert!(names.contains(&"processUser"));
        assert!(names.contains(&"TypeError"));
        assert!(!signals.weighted);
        assert_eq!(signals.intent, Intent::Unknown);
    }

    #[test]
    fn scored_keywords_are_weighted_and_capped()
    {
        let ex = ScoredExtractor::new().unwrap();
        let text = "session_token expires; session_token refresh fails; refresh again";
        let kws = ex.keywords(text, &[]);

        assert_eq!(kws[0].term, "session_token");
        assert!((kws[0].weight - 1.0).abs() < f32::EPSILON);
        assert!(
            kws.iter()
                .all(|k| k.weight > 0.0 && k.weight <= 1.0)
        );
        assert!(kws.len() <= MAX_SIGNALS);
    }

    #[test]
    fn scored_entities_carry_kind_confidence()
    {
        let ex = ScoredExtractor::new().unwrap();
        let signals = ex.extract(&bug("calling parseConfig( in loader.py raises ConfigError"));

        let file = signals
            .entities
            .iter()
            .find(|e| e.name == "loader.py")
            .unwrap();
        assert_eq!(file.kind, EntityKind::File);
        assert!((file.confidence - 0.9).abs() < f32::EPSILON);

        let func = signals
            .entities
            .iter()
            .find(|e| e.name == "parseConfig")
            .unwrap();
        assert_eq!(func.kind, EntityKind::Function);

        let class = signals
            .entities
            .iter()
            .find(|e| e.name == "ConfigError")
            .unwrap();
        assert_eq!(class.kind, EntityKind::Class);
    }

    #[test]
    fn caller_signals_come_first()
    {
        let ex = ScoredExtractor::new().unwrap();
        let mut input = bug("timeout while saving");
        input.keywords = vec!["Checkout".into()];
        input.entities = vec!["CartService".into()];
        let signals = ex.extract(&input);

        assert_eq!(signals.keywords[0].term, "checkout");
        assert_eq!(signals.entities[0].name, "CartService");
        assert_eq!(signals.entities[0].kind, EntityKind::Class);
    }

    #[test]
    fn intent_follows_cue_words()
    {
        assert_eq!(classify_intent("App crashes with an error"), Intent::Debug);
        assert_eq!(classify_intent("Refactor and simplify the parser"), Intent::Refactor);
        assert_eq!(classify_intent("Search is slow, improve performance"), Intent::Optimize);
        assert_eq!(classify_intent("Lorem ipsum"), Intent::Unknown);
    }

    #[test]
    fn entity_classification_heuristics()
    {
        assert_eq!(classify_entity("user.js"), EntityKind::File);
        assert_eq!(classify_entity("save()"), EntityKind::Function);
        assert_eq!(classify_entity("UserService"), EntityKind::Class);
        assert_eq!(classify_entity("max_retries"), EntityKind::Variable);
        assert_eq!(classify_entity("render"), EntityKind::Function);
    }
}
