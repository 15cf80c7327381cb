//! Phi-weighted trust scoring per `(agent, skill_domain)`.
//!
//! `phi = clamp((Σ wᵢ·1[approvedᵢ] + p·π) / (Σ wᵢ + p), phi_min, phi_max)`
//! with `wᵢ = e^(−λ·age_daysᵢ)`, neutral prior π = 0.5, prior weight p = 2.
//! New agents converge from the prior; old outcomes fade; scores are
//! strictly bounded; domains are independent.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use convergent_core::protocol::{Vote, VoteChoice};
use convergent_core::{ConvergentResult, CoordinationConfig};

use crate::store::ScoreStore;

const PRIOR_SCORE: f64 = 0.5;
const PRIOR_WEIGHT: f64 = 2.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// The outcome of a completed task, as fed to the phi scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Approved,
    Rejected,
    Failed,
}

impl TaskOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskOutcome::Approved => "approved",
            TaskOutcome::Rejected => "rejected",
            TaskOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(TaskOutcome::Approved),
            "rejected" => Some(TaskOutcome::Rejected),
            "failed" => Some(TaskOutcome::Failed),
            _ => None,
        }
    }
}

/// Computes and caches phi trust scores.
///
/// The vote choice enum includes abstain/escalate, but only approved vs
/// not-approved matters to phi. Scores are per-domain: an agent good at
/// code review may be bad at testing.
pub struct PhiScorer {
    store: Arc<ScoreStore>,
    decay_rate: f64,
    min_score: f64,
    max_score: f64,
}

impl PhiScorer {
    pub fn new(store: Arc<ScoreStore>, config: &CoordinationConfig) -> Self {
        Self {
            store,
            decay_rate: config.phi_decay_rate,
            min_score: config.phi_min,
            max_score: config.phi_max,
        }
    }

    /// The pure phi formula over `(outcome, age_days)` pairs.
    pub fn calculate(
        outcomes: &[(TaskOutcome, f64)],
        decay_rate: f64,
        min_score: f64,
        max_score: f64,
    ) -> f64 {
        let mut weighted_successes = 0.0;
        let mut weighted_total = 0.0;
        for (outcome, age_days) in outcomes {
            let weight = (-decay_rate * age_days.max(0.0)).exp();
            weighted_total += weight;
            if *outcome == TaskOutcome::Approved {
                weighted_successes += weight;
            }
        }

        let raw = (weighted_successes + PRIOR_WEIGHT * PRIOR_SCORE)
            / (weighted_total + PRIOR_WEIGHT);
        raw.clamp(min_score, max_score)
    }

    /// Record an outcome, recompute the score from the full history, and
    /// cache it. Recomputation is idempotent.
    #[instrument(skip(self))]
    pub fn record_outcome(
        &self,
        agent_id: &str,
        skill_domain: &str,
        outcome: TaskOutcome,
        now: DateTime<Utc>,
    ) -> ConvergentResult<f64> {
        self.store
            .record_outcome(agent_id, skill_domain, outcome.as_str(), now)?;
        let score = self.recompute(agent_id, skill_domain, now)?;
        self.store.save_score(agent_id, skill_domain, score)?;
        debug!(agent_id, skill_domain, score, "phi updated");
        Ok(score)
    }

    /// The current phi score: the cached value, or the prior for unseen
    /// `(agent, domain)` pairs.
    pub fn score(&self, agent_id: &str, skill_domain: &str) -> ConvergentResult<f64> {
        Ok(self
            .store
            .score(agent_id, skill_domain)?
            .unwrap_or(PRIOR_SCORE))
    }

    /// All cached scores for an agent.
    pub fn all_scores(&self, agent_id: &str) -> ConvergentResult<Vec<(String, f64)>> {
        self.store.all_scores(agent_id)
    }

    /// Return a vote with `weighted_score = phi(agent, role) * confidence`.
    ///
    /// The phi score is looked up server-side, never taken from the
    /// self-reported identity, so agents cannot inflate their own weight.
    pub fn weight_vote(&self, vote: Vote) -> ConvergentResult<Vote> {
        let phi = self.score(&vote.agent.agent_id, &vote.agent.role)?;
        let confidence = match vote.choice {
            VoteChoice::Abstain => 0.0,
            _ => vote.confidence,
        };
        Ok(Vote {
            weighted_score: phi * confidence,
            ..vote
        })
    }

    fn recompute(
        &self,
        agent_id: &str,
        skill_domain: &str,
        now: DateTime<Utc>,
    ) -> ConvergentResult<f64> {
        let raw = self.store.outcomes(agent_id, skill_domain)?;
        let outcomes: Vec<(TaskOutcome, f64)> = raw
            .iter()
            .filter_map(|(outcome, ts)| {
                let kind = TaskOutcome::parse(outcome)?;
                let age_days = ((now - *ts).num_seconds().max(0) as f64) / SECONDS_PER_DAY;
                Some((kind, age_days))
            })
            .collect();
        Ok(Self::calculate(
            &outcomes,
            self.decay_rate,
            self.min_score,
            self.max_score,
        ))
    }
}
