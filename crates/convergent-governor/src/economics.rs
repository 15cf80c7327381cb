//! Layer 3: economics. Escalation is an expected-value calculation, not a
//! conversation — escalate when the expected cost of a wrong auto-resolve
//! exceeds the cost of asking, within a budget.

use serde::{Deserialize, Serialize};

/// Economic model for coordination decisions. Costs are abstract units;
/// the ratios matter more than the absolutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    pub resolve_cost: f64,
    pub escalation_cost: f64,
    pub rework_cost_per_conflict: f64,
    pub human_cost: f64,
    /// P(rework) when confidence is below the threshold.
    pub rework_probability_low_confidence: f64,
    /// P(rework) when confidence is at or above the threshold.
    pub rework_probability_high_confidence: f64,
    pub confidence_threshold: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            resolve_cost: 0.001,
            escalation_cost: 0.01,
            rework_cost_per_conflict: 0.10,
            human_cost: 1.00,
            rework_probability_low_confidence: 0.5,
            rework_probability_high_confidence: 0.05,
            confidence_threshold: 0.7,
        }
    }
}

/// Cost budget for a coordination session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Budget {
    pub max_cost: f64,
    pub cost_incurred: f64,
    pub resolves_performed: u64,
    pub escalations_performed: u64,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_cost: 10.0,
            cost_incurred: 0.0,
            resolves_performed: 0,
            escalations_performed: 0,
        }
    }
}

impl Budget {
    pub fn with_max_cost(max_cost: f64) -> Self {
        Self {
            max_cost,
            ..Default::default()
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.max_cost - self.cost_incurred).max(0.0)
    }

    pub fn exhausted(&self) -> bool {
        self.remaining() <= 0.0
    }

    pub fn can_afford(&self, cost: f64) -> bool {
        self.cost_incurred + cost <= self.max_cost
    }

    /// Charge a cost. Returns false without charging when over budget.
    pub fn charge(&mut self, cost: f64) -> bool {
        if !self.can_afford(cost) {
            return false;
        }
        self.cost_incurred += cost;
        true
    }

    pub fn record_resolve(&mut self, cost: f64) {
        self.charge(cost);
        self.resolves_performed += 1;
    }

    pub fn record_escalation(&mut self, cost: f64) {
        self.charge(cost);
        self.escalations_performed += 1;
    }
}

/// What the economics layer recommends for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    AutoResolve,
    Escalate,
    Block,
}

/// The recommendation, with the expected cost of each option.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationDecision {
    pub action: EscalationAction,
    pub expected_cost_auto: f64,
    pub expected_cost_escalate: f64,
    pub confidence: f64,
    pub reasoning: String,
}

/// Expected-value escalation policy.
///
/// `E[auto] = P(rework | confidence) · rework_cost + resolve_cost`
/// `E[escalate] = escalation_cost + human_cost`
///
/// Escalate when `E[auto] − E[escalate] > τ`; block when the budget cannot
/// absorb any further work.
pub struct EscalationPolicy {
    cost_model: CostModel,
    /// τ — the expected-value margin above which escalation wins.
    ev_threshold: f64,
}

impl EscalationPolicy {
    pub fn new(cost_model: CostModel, ev_threshold: f64) -> Self {
        Self {
            cost_model,
            ev_threshold,
        }
    }

    /// Evaluate one conflict. `confidence` is the stability of the
    /// highest-stability side; `affected_agents` scales the rework cost.
    pub fn evaluate(
        &self,
        budget: &mut Budget,
        confidence: f64,
        affected_agents: u64,
    ) -> EscalationDecision {
        let cm = &self.cost_model;
        let p_rework = if confidence >= cm.confidence_threshold {
            cm.rework_probability_high_confidence
        } else {
            cm.rework_probability_low_confidence
        };

        let rework_cost = cm.rework_cost_per_conflict * affected_agents.max(1) as f64;
        let expected_auto = p_rework * rework_cost + cm.resolve_cost;
        let expected_escalate = cm.escalation_cost + cm.human_cost;

        if budget.exhausted() {
            return EscalationDecision {
                action: EscalationAction::Block,
                expected_cost_auto: expected_auto,
                expected_cost_escalate: expected_escalate,
                confidence,
                reasoning: "coordination budget exhausted".to_string(),
            };
        }

        // If escalation cannot be afforded, auto-resolve is the only move.
        if !budget.can_afford(expected_escalate) {
            budget.record_resolve(expected_auto);
            return EscalationDecision {
                action: EscalationAction::AutoResolve,
                expected_cost_auto: expected_auto,
                expected_cost_escalate: expected_escalate,
                confidence,
                reasoning: format!(
                    "budget cannot absorb escalation ({expected_escalate:.3} > {:.3} remaining)",
                    budget.remaining()
                ),
            };
        }

        if expected_auto - expected_escalate > self.ev_threshold {
            budget.record_escalation(expected_escalate);
            EscalationDecision {
                action: EscalationAction::Escalate,
                expected_cost_auto: expected_auto,
                expected_cost_escalate: expected_escalate,
                confidence,
                reasoning: format!(
                    "escalation is cheaper: {expected_escalate:.4} vs {expected_auto:.4} \
                     (confidence {confidence:.2}, P(rework) {p_rework:.2})"
                ),
            }
        } else {
            budget.record_resolve(expected_auto);
            EscalationDecision {
                action: EscalationAction::AutoResolve,
                expected_cost_auto: expected_auto,
                expected_cost_escalate: expected_escalate,
                confidence,
                reasoning: format!(
                    "auto-resolve is cheaper: {expected_auto:.4} vs {expected_escalate:.4} \
                     (confidence {confidence:.2}, P(rework) {p_rework:.2})"
                ),
            }
        }
    }
}
