//! Property tests for the scoring laws: monotonicity in evidence,
//! decay in time, boundedness.

use chrono::{Duration, TimeZone, Utc};
use convergent_core::protocol::{Evidence, EvidenceKind};
use convergent_scoring::{PhiScorer, StabilityScorer, TaskOutcome};
use proptest::prelude::*;

fn arb_kind() -> impl Strategy<Value = EvidenceKind> {
    prop_oneof![
        Just(EvidenceKind::Speculative),
        Just(EvidenceKind::Committed),
        Just(EvidenceKind::Tested),
        Just(EvidenceKind::Consumed),
        Just(EvidenceKind::Manual),
    ]
}

fn arb_evidence() -> impl Strategy<Value = (EvidenceKind, f64, i64)> {
    (arb_kind(), 0.0f64..2.0, 0i64..365)
}

proptest! {
    #[test]
    fn stability_is_bounded(items in prop::collection::vec(arb_evidence(), 0..30)) {
        let scorer = StabilityScorer::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let evidence: Vec<Evidence> = items
            .into_iter()
            .map(|(kind, weight, age)| {
                Evidence::new(kind, "prop").with_weight(weight).at(now - Duration::days(age))
            })
            .collect();
        let score = scorer.score_evidence_at(&evidence, now);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn superset_evidence_scores_at_least_as_high(
        base in prop::collection::vec(arb_evidence(), 0..15),
        extra in prop::collection::vec(arb_evidence(), 1..10),
    ) {
        let scorer = StabilityScorer::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let build = |items: &[(EvidenceKind, f64, i64)]| -> Vec<Evidence> {
            items
                .iter()
                .map(|(kind, weight, age)| {
                    Evidence::new(*kind, "prop").with_weight(*weight).at(now - Duration::days(*age))
                })
                .collect()
        };
        let smaller = build(&base);
        let mut larger = smaller.clone();
        larger.extend(build(&extra));
        prop_assert!(
            scorer.score_evidence_at(&larger, now) >= scorer.score_evidence_at(&smaller, now)
        );
    }

    #[test]
    fn stability_never_increases_with_age(
        items in prop::collection::vec(arb_evidence(), 1..15),
        ahead_days in 1i64..365,
    ) {
        let scorer = StabilityScorer::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let evidence: Vec<Evidence> = items
            .into_iter()
            .map(|(kind, weight, age)| {
                Evidence::new(kind, "prop").with_weight(weight).at(now - Duration::days(age))
            })
            .collect();
        let later = now + Duration::days(ahead_days);
        prop_assert!(
            scorer.score_evidence_at(&evidence, later)
                <= scorer.score_evidence_at(&evidence, now)
        );
    }

    #[test]
    fn phi_stays_within_bounds(
        approvals in 0usize..50,
        rejections in 0usize..50,
        age in 0.0f64..400.0,
    ) {
        let mut outcomes = vec![(TaskOutcome::Approved, age); approvals];
        outcomes.extend(vec![(TaskOutcome::Rejected, age); rejections]);
        let phi = PhiScorer::calculate(&outcomes, 0.05, 0.1, 0.95);
        prop_assert!((0.1..=0.95).contains(&phi));
    }
}
