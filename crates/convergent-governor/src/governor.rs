//! The three-layer merge governor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use convergent_core::protocol::Intent;
use convergent_core::{Conflict, ConflictClass, ConvergentResult, CoordinationConfig};
use convergent_graph::IntentGraph;
use convergent_scoring::StabilityScorer;
use convergent_versioning::VersionedGraph;

use crate::constraints::{ConstraintEngine, ConstraintReport};
use crate::economics::{Budget, CostModel, EscalationAction, EscalationDecision, EscalationPolicy};
use crate::gates::GateScope;

/// The governor's verdict on a proposed publish or merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorOutcome {
    /// No conflicts at all — merge cleanly.
    Merge,
    /// Conflicts resolved deterministically in favor of the
    /// higher-stability side.
    AutoResolve,
    /// Escalated to a consensus vote or human review.
    Escalate,
    /// A hard constraint or hard-classified conflict — fatal.
    Reject,
    /// The coordination budget refuses further work.
    Block,
}

/// Which layer produced the decisive verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorLayer {
    Constraints,
    Intents,
    Economics,
}

/// The governor's full account of a decision: outcome, deciding layer,
/// the inputs that triggered the verdict, and per-conflict economics.
#[derive(Debug, Clone)]
pub struct GovernorReport {
    pub outcome: GovernorOutcome,
    pub layer: GovernorLayer,
    pub rationale: Vec<String>,
    pub constraint_report: Option<ConstraintReport>,
    pub conflicts: Vec<Conflict>,
    /// The intent favored by an AUTO_RESOLVE outcome.
    pub winner: Option<String>,
    pub escalations: Vec<EscalationDecision>,
}

impl GovernorReport {
    fn decided(outcome: GovernorOutcome, layer: GovernorLayer, rationale: String) -> Self {
        Self {
            outcome,
            layer,
            rationale: vec![rationale],
            constraint_report: None,
            conflicts: Vec::new(),
            winner: None,
            escalations: Vec::new(),
        }
    }

    pub fn approved(&self) -> bool {
        matches!(
            self.outcome,
            GovernorOutcome::Merge | GovernorOutcome::AutoResolve
        )
    }
}

/// Sequences the three layers in strict order, short-circuiting on the
/// first decisive verdict: constraints must be satisfiable, intent
/// conflicts must be classified, and remaining ambiguity is settled by
/// expected value — auto-resolve below the threshold, escalate above it.
pub struct MergeGovernor {
    engine: ConstraintEngine,
    policy: EscalationPolicy,
    budget: Budget,
}

impl MergeGovernor {
    pub fn new(config: &CoordinationConfig) -> Self {
        Self {
            engine: ConstraintEngine::new(StabilityScorer::new(config)),
            policy: EscalationPolicy::new(CostModel::default(), config.escalation_ev_threshold),
            budget: Budget::default(),
        }
    }

    pub fn with_parts(engine: ConstraintEngine, policy: EscalationPolicy, budget: Budget) -> Self {
        Self {
            engine,
            policy,
            budget,
        }
    }

    pub fn engine_mut(&mut self) -> &mut ConstraintEngine {
        &mut self.engine
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Evaluate a proposed intent against the graph, as of `now`.
    #[instrument(skip(self, intent, graph, scope), fields(intent_id = %intent.intent_id))]
    pub fn evaluate_at(
        &mut self,
        intent: &Intent,
        graph: &IntentGraph,
        scope: &GateScope,
        now: DateTime<Utc>,
    ) -> ConvergentResult<GovernorReport> {
        // Layer 1: constraints. Any hard violation is fatal; no further
        // layers are consulted.
        let constraint_report = self.engine.evaluate(intent, scope, now);
        if !constraint_report.passed {
            let mut report = GovernorReport::decided(
                GovernorOutcome::Reject,
                GovernorLayer::Constraints,
                format!(
                    "hard constraint violation: {}",
                    constraint_report.blocking.join("; ")
                ),
            );
            report.constraint_report = Some(constraint_report);
            info!(outcome = "reject", layer = "constraints", "governor verdict");
            return Ok(report);
        }

        // Layer 2: intent conflicts.
        let conflicts = graph.find_conflicting_at(intent, now)?;
        if let Some(hard) = conflicts
            .iter()
            .find(|c| c.class == ConflictClass::HardConstraint)
        {
            let mut report = GovernorReport::decided(
                GovernorOutcome::Reject,
                GovernorLayer::Intents,
                format!("hard-classified conflict with '{}': {}", hard.theirs, hard.detail),
            );
            report.constraint_report = Some(constraint_report);
            report.conflicts = conflicts;
            info!(outcome = "reject", layer = "intents", "governor verdict");
            return Ok(report);
        }

        if conflicts.is_empty() {
            let mut report = GovernorReport::decided(
                GovernorOutcome::Merge,
                GovernorLayer::Intents,
                "no conflicts with the shared graph".to_string(),
            );
            report.constraint_report = Some(constraint_report);
            info!(outcome = "merge", layer = "intents", "governor verdict");
            return Ok(report);
        }

        let escalatable: Vec<&Conflict> = conflicts
            .iter()
            .filter(|c| !c.class.mergeable())
            .collect();

        if escalatable.is_empty() {
            // Only SOFT conflicts: deterministic yield to the stronger side.
            let winner = strongest_winner(&conflicts);
            let mut report = GovernorReport::decided(
                GovernorOutcome::AutoResolve,
                GovernorLayer::Intents,
                format!(
                    "soft conflicts only; higher-stability side '{}' prevails",
                    winner.clone().unwrap_or_default()
                ),
            );
            report.constraint_report = Some(constraint_report);
            report.conflicts = conflicts;
            report.winner = winner;
            info!(outcome = "auto_resolve", layer = "intents", "governor verdict");
            return Ok(report);
        }

        // Layer 3: economics, per escalatable conflict.
        let mut escalations = Vec::new();
        let mut blocked = false;
        let mut escalate = false;
        for conflict in &escalatable {
            if conflict.class == ConflictClass::HumanEscalation {
                escalate = true;
                continue;
            }
            let confidence = conflict.my_stability.max(conflict.their_stability);
            let decision = self.policy.evaluate(&mut self.budget, confidence, 1);
            match decision.action {
                EscalationAction::Block => blocked = true,
                EscalationAction::Escalate => escalate = true,
                EscalationAction::AutoResolve => {}
            }
            escalations.push(decision);
        }

        let (outcome, rationale) = if blocked {
            (
                GovernorOutcome::Block,
                "coordination budget exhausted".to_string(),
            )
        } else if escalate {
            (
                GovernorOutcome::Escalate,
                "expected value favors escalation".to_string(),
            )
        } else {
            (
                GovernorOutcome::AutoResolve,
                "expected value favors auto-resolution toward the higher-stability side"
                    .to_string(),
            )
        };

        let winner = strongest_winner(&conflicts);
        let mut report = GovernorReport::decided(outcome, GovernorLayer::Economics, rationale);
        report.constraint_report = Some(constraint_report);
        report.conflicts = conflicts;
        report.escalations = escalations;
        if outcome == GovernorOutcome::AutoResolve {
            report.winner = winner;
        }
        info!(?outcome, layer = "economics", "governor verdict");
        Ok(report)
    }

    /// Evaluate a proposed intent as of the current time.
    pub fn evaluate(
        &mut self,
        intent: &Intent,
        graph: &IntentGraph,
        scope: &GateScope,
    ) -> ConvergentResult<GovernorReport> {
        self.evaluate_at(intent, graph, scope, Utc::now())
    }

    /// Evaluate a branch merge: every intent in `incoming` absent from
    /// `base` goes through the three layers against the base graph. The
    /// first decisive non-approving verdict wins.
    pub fn evaluate_merge_at(
        &mut self,
        base: &VersionedGraph,
        incoming: &VersionedGraph,
        scope: &GateScope,
        now: DateTime<Utc>,
    ) -> ConvergentResult<GovernorReport> {
        let base_ids: Vec<String> = base
            .graph()
            .all()?
            .into_iter()
            .map(|i| i.intent_id)
            .collect();

        let mut merged_rationale = Vec::new();
        let mut aggregate: Option<GovernorReport> = None;

        for intent in incoming.graph().all()? {
            if base_ids.contains(&intent.intent_id) {
                continue;
            }
            let report = self.evaluate_at(&intent, base.graph(), scope, now)?;
            merged_rationale.push(format!(
                "'{}': {}",
                intent.intent_id,
                report.rationale.join("; ")
            ));
            match report.outcome {
                GovernorOutcome::Reject | GovernorOutcome::Block => {
                    let mut decisive = report;
                    decisive.rationale = merged_rationale;
                    return Ok(decisive);
                }
                GovernorOutcome::Escalate => {
                    aggregate = Some(report);
                }
                GovernorOutcome::AutoResolve => {
                    if aggregate
                        .as_ref()
                        .is_none_or(|r| r.outcome == GovernorOutcome::Merge)
                    {
                        aggregate = Some(report);
                    }
                }
                GovernorOutcome::Merge => {
                    if aggregate.is_none() {
                        aggregate = Some(report);
                    }
                }
            }
        }

        let mut report = aggregate.unwrap_or_else(|| {
            GovernorReport::decided(
                GovernorOutcome::Merge,
                GovernorLayer::Intents,
                "no new intents to merge".to_string(),
            )
        });
        report.rationale = merged_rationale;
        Ok(report)
    }
}

fn strongest_winner(conflicts: &[Conflict]) -> Option<String> {
    conflicts
        .iter()
        .max_by(|a, b| {
            let wa = a.my_stability.max(a.their_stability);
            let wb = b.my_stability.max(b.their_stability);
            wa.partial_cmp(&wb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .and_then(|c| c.winner.clone())
}
