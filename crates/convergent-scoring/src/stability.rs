//! Stability scoring: evidence weight with exponential temporal decay.
//!
//! `score = clamp(Σ wᵢ · e^(−λ · age_daysᵢ), 0, 1)` where `wᵢ` is the
//! effective evidence weight and λ the decay rate. Monotone in additional
//! evidence at a fixed time, strictly decreasing in age absent new
//! evidence, bounded, deterministic.

use chrono::{DateTime, Utc};

use convergent_core::config::EvidenceWeights;
use convergent_core::protocol::{Evidence, Intent};
use convergent_core::CoordinationConfig;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Computes stability scores from evidence lists.
#[derive(Debug, Clone)]
pub struct StabilityScorer {
    decay_rate: f64,
    weights: EvidenceWeights,
}

impl StabilityScorer {
    /// Build a scorer from the coordination config.
    pub fn new(config: &CoordinationConfig) -> Self {
        Self {
            decay_rate: config.stability_decay_rate,
            weights: config.evidence_weights.clone(),
        }
    }

    /// Build a scorer with explicit decay rate and weights.
    pub fn with_params(decay_rate: f64, weights: EvidenceWeights) -> Self {
        Self {
            decay_rate,
            weights,
        }
    }

    /// The decay rate λ, per day.
    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    /// Score an evidence list as of `now`. Empty evidence scores 0.
    pub fn score_evidence_at(&self, evidence: &[Evidence], now: DateTime<Utc>) -> f64 {
        let sum: f64 = evidence
            .iter()
            .map(|e| {
                let weight = self.weights.effective(e);
                let age_days =
                    ((now - e.timestamp).num_seconds().max(0) as f64) / SECONDS_PER_DAY;
                weight * (-self.decay_rate * age_days).exp()
            })
            .sum();
        sum.clamp(0.0, 1.0)
    }

    /// Score an intent as of `now`.
    pub fn score_at(&self, intent: &Intent, now: DateTime<Utc>) -> f64 {
        self.score_evidence_at(&intent.evidence, now)
    }

    /// Score an intent as of the current time.
    pub fn score(&self, intent: &Intent) -> f64 {
        self.score_at(intent, Utc::now())
    }
}

impl Default for StabilityScorer {
    fn default() -> Self {
        Self::new(&CoordinationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use convergent_core::protocol::EvidenceKind;

    fn evidence(kind: EvidenceKind, age_days: i64, now: DateTime<Utc>) -> Evidence {
        Evidence::new(kind, "test").at(now - Duration::days(age_days))
    }

    #[test]
    fn empty_evidence_scores_zero() {
        let scorer = StabilityScorer::default();
        assert_eq!(scorer.score_evidence_at(&[], Utc::now()), 0.0);
    }

    #[test]
    fn fresh_committed_evidence_scores_base_weight() {
        let scorer = StabilityScorer::default();
        let now = Utc::now();
        let score = scorer.score_evidence_at(&[evidence(EvidenceKind::Committed, 0, now)], now);
        assert!((score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn more_evidence_never_lowers_the_score() {
        let scorer = StabilityScorer::default();
        let now = Utc::now();
        let smaller = vec![evidence(EvidenceKind::Speculative, 0, now)];
        let mut larger = smaller.clone();
        larger.push(evidence(EvidenceKind::Tested, 2, now));
        assert!(
            scorer.score_evidence_at(&larger, now) >= scorer.score_evidence_at(&smaller, now)
        );
    }

    #[test]
    fn score_decays_with_age() {
        let scorer = StabilityScorer::default();
        let now = Utc::now();
        let fixed = vec![evidence(EvidenceKind::Committed, 0, now)];
        let later = now + Duration::days(30);
        assert!(scorer.score_evidence_at(&fixed, later) < scorer.score_evidence_at(&fixed, now));
    }

    #[test]
    fn score_is_bounded() {
        let scorer = StabilityScorer::default();
        let now = Utc::now();
        let pile: Vec<Evidence> = (0..20)
            .map(|_| evidence(EvidenceKind::Consumed, 0, now))
            .collect();
        assert_eq!(scorer.score_evidence_at(&pile, now), 1.0);
    }
}
