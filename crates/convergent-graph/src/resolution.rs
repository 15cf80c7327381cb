//! Resolution output types: overlap reports, adjustments, conflicts.
//!
//! Conflicts are data carried alongside success (see
//! [`convergent_core::conflict`]); the resolver never raises on them.

use serde::{Deserialize, Serialize};

use convergent_core::protocol::{Constraint, Intent};
use convergent_core::Conflict;

/// Why one interface spec matched another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReason {
    /// Name of the spec on the resolving intent.
    pub my_interface: String,
    /// Name of the spec on the published intent.
    pub their_interface: String,
    pub structural_score: f64,
    /// Reason from the semantic matcher, when its verdict contributed.
    pub semantic_reason: Option<String>,
}

/// An intent that overlaps the one being resolved, with the reasons.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapReport {
    pub intent: Intent,
    pub sequence: u64,
    pub reasons: Vec<MatchReason>,
}

/// What kind of alignment the resolver recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    /// Drop a provision and consume another agent's instead.
    ConsumeInstead,
    /// Adopt a constraint another agent published.
    AdoptConstraint,
    /// Yield to a higher-stability conflicting decision.
    YieldTo,
    /// Modify an interface signature for compatibility.
    AdaptSignature,
}

/// A single recommended adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub kind: AdjustmentKind,
    pub description: String,
    /// The published intent that motivated the adjustment.
    pub source_intent_id: String,
}

/// Result of resolving an intent against the graph: how to align, what
/// collides, and which constraints to adopt.
#[derive(Debug, Clone, Default)]
pub struct ResolutionOutcome {
    pub intent_id: String,
    pub adjustments: Vec<Adjustment>,
    pub conflicts: Vec<Conflict>,
    pub adopted_constraints: Vec<Constraint>,
}

impl ResolutionOutcome {
    /// No conflicts were found.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}
