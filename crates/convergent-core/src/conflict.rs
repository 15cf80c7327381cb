//! Conflict classification — disagreement between overlapping intents,
//! carried as a value alongside success, never raised.

use serde::{Deserialize, Serialize};

/// Classification of a conflict between two overlapping intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictClass {
    /// Compatible — no action needed.
    None,
    /// Lower-stability side yields to the higher-stability side.
    Soft,
    /// Stabilities within epsilon of each other — no clear winner.
    Ambiguous,
    /// Signatures disagree on parameter shape.
    Structural,
    /// Semantic matcher says unrelated despite structural overlap.
    Semantic,
    /// A hard constraint is violated.
    HardConstraint,
    /// Matcher or governor explicitly escalated.
    HumanEscalation,
}

impl ConflictClass {
    /// Whether a merge may proceed past this conflict without resolution.
    pub fn mergeable(self) -> bool {
        matches!(self, ConflictClass::None | ConflictClass::Soft)
    }

    /// Lowercase spelling, as serialized.
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictClass::None => "none",
            ConflictClass::Soft => "soft",
            ConflictClass::Ambiguous => "ambiguous",
            ConflictClass::Structural => "structural",
            ConflictClass::Semantic => "semantic",
            ConflictClass::HardConstraint => "hard_constraint",
            ConflictClass::HumanEscalation => "human_escalation",
        }
    }
}

/// A classified disagreement between two intents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// The intent being resolved.
    pub mine: String,
    /// The previously published intent it collides with.
    pub theirs: String,
    pub class: ConflictClass,
    pub detail: String,
    pub my_stability: f64,
    pub their_stability: f64,
    /// The side a SOFT resolution favors, when there is one.
    pub winner: Option<String>,
}

/// Inputs to classification, gathered by the matcher and the graph.
#[derive(Debug, Clone, Default)]
pub struct ConflictEvidence {
    /// Both sides carry parseable signatures that disagree.
    pub signatures_disagree: bool,
    /// A semantic matcher ran and judged the pair unrelated.
    pub semantically_unrelated: bool,
    /// A hard-severity constraint from one side is violated by the other.
    pub hard_constraint_violated: bool,
    /// The matcher or governor explicitly requested escalation.
    pub escalation_requested: bool,
}

/// Classify a conflict between two overlapping intents.
///
/// Pure function of the match evidence, the two stability scores, and the
/// tie epsilon. Evaluation order: hard constraint, explicit escalation,
/// structural disagreement, semantic disagreement, ambiguity, soft yield.
pub fn classify(
    evidence: &ConflictEvidence,
    my_stability: f64,
    their_stability: f64,
    epsilon: f64,
) -> ConflictClass {
    if evidence.hard_constraint_violated {
        return ConflictClass::HardConstraint;
    }
    if evidence.escalation_requested {
        return ConflictClass::HumanEscalation;
    }
    if evidence.signatures_disagree {
        return ConflictClass::Structural;
    }
    if evidence.semantically_unrelated {
        return ConflictClass::Semantic;
    }
    if (my_stability - their_stability).abs() <= epsilon {
        return ConflictClass::Ambiguous;
    }
    ConflictClass::Soft
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_constraint_dominates() {
        let evidence = ConflictEvidence {
            hard_constraint_violated: true,
            signatures_disagree: true,
            ..Default::default()
        };
        assert_eq!(
            classify(&evidence, 0.9, 0.1, 0.05),
            ConflictClass::HardConstraint
        );
    }

    #[test]
    fn structural_beats_ambiguity() {
        let evidence = ConflictEvidence {
            signatures_disagree: true,
            ..Default::default()
        };
        assert_eq!(classify(&evidence, 0.5, 0.5, 0.05), ConflictClass::Structural);
    }

    #[test]
    fn close_stabilities_are_ambiguous() {
        let evidence = ConflictEvidence::default();
        assert_eq!(classify(&evidence, 0.52, 0.50, 0.05), ConflictClass::Ambiguous);
    }

    #[test]
    fn clear_gap_is_soft() {
        let evidence = ConflictEvidence::default();
        assert_eq!(classify(&evidence, 0.2, 0.6, 0.05), ConflictClass::Soft);
    }
}
