// Property checks for the invariants every collection run relies on:
// scores stay in [0, 1], filtering respects threshold and cap,
// summaries are prefixes, and budgeting never exceeds its ceiling.
mod util;

use proptest::prelude::*;
use taskctx::core::budget::{
    apply_token_budget, dedupe_contexts, estimate_tokens, filter_sections, summarize,
};
use taskctx::core::scoring::{RelevanceScorer, ScoringWeights};
use taskctx::core::signals::{Entity, EntityKind, Intent, Keyword, Signals};
use taskctx::core::task::TaskType;

fn signals(
    terms: &[String],
    weight: f32,
) -> Signals
{
    Signals {
        keywords: terms
            .iter()
            .map(|t| Keyword { term: t.clone(), weight })
            .collect(),
        entities: terms
            .iter()
            .map(|t| Entity { name: t.clone(), kind: EntityKind::Function, confidence: weight })
            .collect(),
        intent: Intent::Debug,
        text: terms.join(" "),
        weighted: true,
    }
}

proptest! {
    #[test]
    fn scores_stay_in_unit_range(
        terms in prop::collection::vec("[a-z]{3,8}", 0..12),
        weight in 0.0f32..=1.0,
        interim in -2.0f32..3.0,
        keyword in 0.0f32..=1.0,
        entity in 0.0f32..=1.0,
    ) {
        let weights = ScoringWeights { keyword, entity, ..ScoringWeights::default() };
        let scorer = RelevanceScorer::new(weights, &signals(&terms, weight), TaskType::Bug, &[]).unwrap();

        let mut section = util::section("src/lib.rs", interim, 1);
        section.content = terms.join(" ").repeat(3);
        section.related_entities = terms.clone();

        let score = scorer.score(&section);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn filter_respects_threshold_and_cap(
        scores in prop::collection::vec(0.0f32..=1.0, 0..60),
        threshold in 0.0f32..=1.0,
        max in 0usize..30,
    ) {
        let sections = scores
            .iter()
            .enumerate()
            .map(|(i, s)| util::section("src/lib.rs", *s, i + 1))
            .collect();
        let kept = filter_sections(sections, threshold, max);

        let eligible = scores.iter().filter(|s| **s >= threshold).count();
        prop_assert_eq!(kept.len(), eligible.min(max));
        prop_assert!(kept.iter().all(|s| s.score >= threshold));
        prop_assert!(kept.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn summaries_are_prefixes_within_their_token_limit(
        lines in prop::collection::vec("[ -~]{0,120}", 0..40),
        crlf in any::<bool>(),
        max_tokens in 0usize..400,
    ) {
        let content = lines.join(if crlf { "\r\n" } else { "\n" });
        let summary = summarize(&content, max_tokens);

        prop_assert!(estimate_tokens(&summary) <= max_tokens);
        let kept = summary.strip_suffix("...").unwrap_or(&summary);
        prop_assert!(content.starts_with(kept));
        if estimate_tokens(&content) <= max_tokens {
            prop_assert_eq!(summary, content);
        }
    }

    #[test]
    fn budget_never_exceeds_ceiling(
        sizes in prop::collection::vec(1usize..4000, 0..25),
        ceiling in 1usize..5000,
        per_context in 1usize..1500,
        summarize_large in any::<bool>(),
    ) {
        let contexts = sizes
            .iter()
            .enumerate()
            .map(|(i, n)| util::context(&format!("T-1_context_{i}"), "x".repeat(*n), 0.5))
            .collect();
        let outcome = apply_token_budget(contexts, ceiling, per_context, summarize_large);

        let total: usize = outcome.contexts.iter().map(|c| estimate_tokens(&c.content)).sum();
        prop_assert_eq!(total, outcome.total_tokens);
        prop_assert!(total <= ceiling);
        prop_assert_eq!(outcome.contexts.len() + outcome.dropped, sizes.len());
    }

    #[test]
    fn dedupe_keeps_one_context_per_prefix(
        copies in 1usize..6,
        padding in "[ \t\n]{0,4}",
    ) {
        let base = "fn render(user: &User) -> Html { html! { <p>{ &user.name }</p> } }";
        let contexts = (0..copies)
            .map(|i| {
                let content = format!("{padding}{}", if i % 2 == 0 { base.to_string() } else { base.to_uppercase() });
                util::context(&format!("T-1_context_{i}"), content, 0.1 * i as f32)
            })
            .collect();
        let kept = dedupe_contexts(contexts);

        prop_assert_eq!(kept.len(), 1);
        prop_assert_eq!(kept[0].id.as_str(), "T-1_context_0");
        prop_assert!((kept[0].relevance_score - 0.1 * (copies - 1) as f32).abs() < 1e-6);
    }
}
