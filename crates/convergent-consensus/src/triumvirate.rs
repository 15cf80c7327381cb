//! The voting engine: collect votes, weight them by server-side phi at
//! evaluation time, evaluate quorum rules, and persist the decision.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use convergent_core::protocol::{
    ConsensusRequest, Decision, DecisionOutcome, QuorumLevel, Vote, VoteChoice,
};
use convergent_core::{ConvergentError, ConvergentResult, CoordinationConfig};
use convergent_scoring::PhiScorer;

use crate::store::DecisionStore;

/// Consensus voting engine.
///
/// Exactly one final decision exists per request. Evaluation before any
/// vote arrives — and before the timeout — yields "no decision yet";
/// evaluation after the timeout with insufficient votes is a deadlock.
/// Votes arriving after the decision are persisted but ignored.
pub struct Triumvirate {
    store: Arc<DecisionStore>,
    scorer: Arc<PhiScorer>,
    default_quorum: QuorumLevel,
    default_timeout_seconds: u64,
}

impl Triumvirate {
    pub fn new(
        store: Arc<DecisionStore>,
        scorer: Arc<PhiScorer>,
        config: &CoordinationConfig,
    ) -> Self {
        Self {
            store,
            scorer,
            default_quorum: config.default_quorum,
            default_timeout_seconds: config.vote_timeout_seconds,
        }
    }

    /// Create and persist a consensus request.
    #[instrument(skip(self, question, context, artifacts))]
    pub fn create_request_at(
        &self,
        task_id: &str,
        question: &str,
        context: &str,
        quorum: Option<QuorumLevel>,
        artifacts: Vec<String>,
        now: DateTime<Utc>,
    ) -> ConvergentResult<ConsensusRequest> {
        let request = ConsensusRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            question: question.to_string(),
            context: context.to_string(),
            quorum: quorum.unwrap_or(self.default_quorum),
            timeout_seconds: self.default_timeout_seconds,
            artifacts,
            requested_at: now,
        };
        self.store.save_request(&request)?;
        info!(request_id = %request.request_id, task_id, "consensus request created");
        Ok(request)
    }

    pub fn create_request(
        &self,
        task_id: &str,
        question: &str,
        context: &str,
        quorum: Option<QuorumLevel>,
        artifacts: Vec<String>,
    ) -> ConvergentResult<ConsensusRequest> {
        self.create_request_at(task_id, question, context, quorum, artifacts, Utc::now())
    }

    /// Submit a vote. The request must exist; one vote per agent. Votes
    /// after the decision are stored for audit but never change it.
    #[instrument(skip(self, vote), fields(request_id = %vote.request_id, agent_id = %vote.agent.agent_id))]
    pub fn submit_vote(&self, vote: Vote) -> ConvergentResult<()> {
        if self.store.request(&vote.request_id)?.is_none() {
            return Err(ConvergentError::validation(format!(
                "unknown consensus request '{}'",
                vote.request_id
            )));
        }
        if !(0.0..=1.0).contains(&vote.confidence) {
            return Err(ConvergentError::validation(
                "vote confidence must be in [0, 1]",
            ));
        }
        let late = self.store.decision(&vote.request_id)?.is_some();
        self.store.save_vote(&vote)?;
        if late {
            info!("vote persisted after decision; ignored by evaluation");
        }
        Ok(())
    }

    /// Record a human confirmation for an `unanimous_human` request.
    pub fn confirm_human(&self, request_id: &str, confirmed_by: &str) -> ConvergentResult<()> {
        self.store
            .confirm_human(request_id, confirmed_by, Utc::now())
    }

    /// Evaluate the request as of `now`.
    ///
    /// Returns the existing decision when one was already made, `None`
    /// while there is nothing decisive yet, and otherwise seals and
    /// persists the outcome.
    #[instrument(skip(self))]
    pub fn evaluate_at(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> ConvergentResult<Option<Decision>> {
        if let Some(existing) = self.store.decision(request_id)? {
            return Ok(Some(existing));
        }
        let request = self.store.request(request_id)?.ok_or_else(|| {
            ConvergentError::validation(format!("unknown consensus request '{request_id}'"))
        })?;

        // Weighted at evaluation time, from the authoritative score store.
        let raw_votes = self.store.votes(request_id, Some(now))?;
        let mut votes = Vec::with_capacity(raw_votes.len());
        for vote in raw_votes {
            votes.push(self.scorer.weight_vote(vote)?);
        }

        let timed_out = request.timed_out(now);

        // Any escalate vote forces ESCALATED.
        if votes.iter().any(|v| v.choice == VoteChoice::Escalate) {
            return self
                .seal(request, votes, DecisionOutcome::Escalated, now)
                .map(Some);
        }

        let substantive: Vec<&Vote> = votes
            .iter()
            .filter(|v| matches!(v.choice, VoteChoice::Approve | VoteChoice::Reject))
            .collect();

        if substantive.len() < quorum_minimum(request.quorum) {
            if !timed_out {
                // No decision yet — not a deadlock until the window closes.
                return Ok(None);
            }
            return self
                .seal(request, votes, DecisionOutcome::Deadlock, now)
                .map(Some);
        }

        let total_approve: f64 = substantive
            .iter()
            .filter(|v| v.choice == VoteChoice::Approve)
            .map(|v| v.weighted_score)
            .sum();
        let total_reject: f64 = substantive
            .iter()
            .filter(|v| v.choice == VoteChoice::Reject)
            .map(|v| v.weighted_score)
            .sum();

        let outcome = match request.quorum {
            QuorumLevel::Any => {
                if total_approve > 0.0 {
                    DecisionOutcome::Approved
                } else {
                    DecisionOutcome::Rejected
                }
            }
            QuorumLevel::Majority => {
                if total_approve > total_reject {
                    DecisionOutcome::Approved
                } else if total_reject > total_approve {
                    DecisionOutcome::Rejected
                } else {
                    break_tie(&substantive)
                }
            }
            QuorumLevel::Unanimous | QuorumLevel::UnanimousHuman => {
                if substantive.iter().all(|v| v.choice == VoteChoice::Approve) {
                    if request.quorum == QuorumLevel::UnanimousHuman
                        && !self.store.human_confirmed(request_id)?
                    {
                        DecisionOutcome::Escalated
                    } else {
                        DecisionOutcome::Approved
                    }
                } else {
                    DecisionOutcome::Rejected
                }
            }
        };

        self.seal(request, votes, outcome, now).map(Some)
    }

    /// Evaluate as of the current time.
    pub fn evaluate(&self, request_id: &str) -> ConvergentResult<Option<Decision>> {
        self.evaluate_at(request_id, Utc::now())
    }

    /// The final decision for a request, if one has been made.
    pub fn decision(&self, request_id: &str) -> ConvergentResult<Option<Decision>> {
        self.store.decision(request_id)
    }

    /// All decisions for a task, newest first.
    pub fn vote_history(&self, task_id: &str) -> ConvergentResult<Vec<Decision>> {
        self.store.decision_history(Some(task_id), None, 100)
    }

    fn seal(
        &self,
        request: ConsensusRequest,
        votes: Vec<Vote>,
        outcome: DecisionOutcome,
        now: DateTime<Utc>,
    ) -> ConvergentResult<Decision> {
        let total_weighted_approve = votes
            .iter()
            .filter(|v| v.choice == VoteChoice::Approve)
            .map(|v| v.weighted_score)
            .sum();
        let total_weighted_reject = votes
            .iter()
            .filter(|v| v.choice == VoteChoice::Reject)
            .map(|v| v.weighted_score)
            .sum();
        let human_confirmed = self.store.human_confirmed(&request.request_id)?;
        let reasoning_summary = votes
            .iter()
            .map(|v| {
                format!(
                    "[{}] {}: {}",
                    serde_json::to_string(&v.choice)
                        .unwrap_or_default()
                        .trim_matches('"'),
                    v.agent.agent_id,
                    v.reasoning
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let decision = Decision {
            request,
            votes,
            outcome,
            total_weighted_approve,
            total_weighted_reject,
            decided_at: now,
            human_confirmed,
            reasoning_summary,
        };
        self.store.save_decision(&decision)?;
        info!(
            request_id = %decision.request.request_id,
            outcome = ?decision.outcome,
            approve = decision.total_weighted_approve,
            reject = decision.total_weighted_reject,
            "decision sealed"
        );
        Ok(decision)
    }
}

/// The minimum number of substantive (approve/reject) votes each quorum
/// rule needs before it can decide: a single voice satisfies ANY, but a
/// majority or unanimity claim needs at least two.
fn quorum_minimum(quorum: QuorumLevel) -> usize {
    match quorum {
        QuorumLevel::Any => 1,
        QuorumLevel::Majority => 2,
        QuorumLevel::Unanimous | QuorumLevel::UnanimousHuman => 2,
    }
}

/// Break a MAJORITY tie with the single highest-weighted substantive
/// vote; a tie among the highest weights is a deadlock.
fn break_tie(substantive: &[&Vote]) -> DecisionOutcome {
    let best = substantive.iter().max_by(|a, b| {
        a.weighted_score
            .partial_cmp(&b.weighted_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let Some(best) = best else {
        return DecisionOutcome::Deadlock;
    };
    let top_choices: std::collections::HashSet<_> = substantive
        .iter()
        .filter(|v| (v.weighted_score - best.weighted_score).abs() < f64::EPSILON)
        .map(|v| v.choice)
        .collect();
    if top_choices.len() > 1 {
        return DecisionOutcome::Deadlock;
    }
    match best.choice {
        VoteChoice::Approve => DecisionOutcome::Approved,
        _ => DecisionOutcome::Rejected,
    }
}
