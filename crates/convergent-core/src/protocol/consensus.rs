//! Consensus protocol models: identities, votes, requests, decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How many agents must agree for a decision to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumLevel {
    /// Any positive approve weight — low-risk reads.
    Any,
    /// Weighted approve > weighted reject — medium-risk, recoverable.
    Majority,
    /// Every substantive vote approves — high-risk, irreversible.
    Unanimous,
    /// Unanimous plus an explicit human confirmation on the decision.
    UnanimousHuman,
}

/// The choices available to a voting agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Approve,
    Reject,
    Abstain,
    /// "I'm not qualified to judge this" — forces ESCALATED.
    Escalate,
}

/// The possible outcomes of a consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approved,
    Rejected,
    Deadlock,
    Escalated,
}

/// Identifies an agent in the coordination system.
///
/// `phi_score` is advisory — authoritative scores come from the phi store
/// at evaluation time, never from the submitted identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    /// The agent's role, used as its skill domain (e.g. "reviewer").
    pub role: String,
    pub model: String,
    pub phi_score: f64,
}

impl AgentIdentity {
    pub fn new(agent_id: &str, role: &str, model: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            role: role.to_string(),
            model: model.to_string(),
            phi_score: 0.5,
        }
    }
}

/// A single agent's vote on a consensus request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub request_id: String,
    pub agent: AgentIdentity,
    pub choice: VoteChoice,
    /// How sure the agent is, in [0, 1].
    pub confidence: f64,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
    /// `phi(agent, domain) * confidence`, set at evaluation time.
    pub weighted_score: f64,
}

impl Vote {
    pub fn new(
        request_id: &str,
        agent: AgentIdentity,
        choice: VoteChoice,
        confidence: f64,
        reasoning: &str,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            agent,
            choice,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.to_string(),
            timestamp: Utc::now(),
            weighted_score: 0.0,
        }
    }
}

/// A request for agents to vote on. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRequest {
    pub request_id: String,
    pub task_id: String,
    pub question: String,
    pub context: String,
    pub quorum: QuorumLevel,
    pub timeout_seconds: u64,
    /// File paths, PR URLs, etc. relevant to the decision.
    pub artifacts: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

impl ConsensusRequest {
    /// Whether the request's voting window has closed at `now`.
    pub fn timed_out(&self, now: DateTime<Utc>) -> bool {
        let elapsed = (now - self.requested_at).num_seconds();
        elapsed > self.timeout_seconds as i64
    }
}

/// The outcome of a consensus round: the request, the full vote set, and
/// the derived totals. Exactly one final decision exists per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub request: ConsensusRequest,
    pub votes: Vec<Vote>,
    pub outcome: DecisionOutcome,
    pub total_weighted_approve: f64,
    pub total_weighted_reject: f64,
    pub decided_at: DateTime<Utc>,
    /// Set when a human confirmed an `unanimous_human` decision.
    pub human_confirmed: bool,
    pub reasoning_summary: String,
}
