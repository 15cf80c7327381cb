//! The intent graph: matching, conflict classification, and resolution
//! layered over an interchangeable backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use convergent_core::conflict::{classify, Conflict, ConflictEvidence};
use convergent_core::matching::{signatures_disagree, structural_score, SemanticMatcher};
use convergent_core::protocol::{ConstraintSeverity, Evidence, Intent, InterfaceSpec};
use convergent_core::{ConvergentResult, CoordinationConfig};
use convergent_scoring::StabilityScorer;

use crate::backend::IntentBackend;
use crate::resolution::{
    Adjustment, AdjustmentKind, MatchReason, OverlapReport, ResolutionOutcome,
};

/// The shared intent graph.
///
/// Publishing is append-only and idempotent; queries produce a consistent
/// snapshot of the log. Matching merges the structural score with an
/// optional semantic matcher using an OR rule on relatedness.
pub struct IntentGraph {
    backend: Box<dyn IntentBackend>,
    scorer: StabilityScorer,
    semantic: Option<Arc<dyn SemanticMatcher>>,
    match_threshold: f64,
    tie_epsilon: f64,
}

impl IntentGraph {
    pub fn new(backend: Box<dyn IntentBackend>, config: &CoordinationConfig) -> Self {
        Self {
            backend,
            scorer: StabilityScorer::new(config),
            semantic: None,
            match_threshold: config.structural_match_threshold,
            tie_epsilon: config.stability_tie_epsilon,
        }
    }

    /// Install a semantic matcher hook.
    pub fn with_semantic_matcher(mut self, matcher: Arc<dyn SemanticMatcher>) -> Self {
        self.set_semantic_matcher(matcher);
        self
    }

    /// Install a semantic matcher hook on an existing graph.
    pub fn set_semantic_matcher(&mut self, matcher: Arc<dyn SemanticMatcher>) {
        self.semantic = Some(matcher);
    }

    pub fn backend(&self) -> &dyn IntentBackend {
        self.backend.as_ref()
    }

    pub fn scorer(&self) -> &StabilityScorer {
        &self.scorer
    }

    /// Publish an intent. Returns its stability score at publish time.
    #[instrument(skip(self, intent), fields(intent_id = %intent.intent_id, agent_id = %intent.agent_id))]
    pub fn publish(&self, intent: &Intent) -> ConvergentResult<f64> {
        let seq = self.backend.publish(intent)?;
        let stability = self.scorer.score(intent);
        info!(seq, stability, "intent published");
        Ok(stability)
    }

    /// Append evidence to a published intent.
    pub fn add_evidence(&self, intent_id: &str, evidence: &Evidence) -> ConvergentResult<()> {
        self.backend.add_evidence(intent_id, evidence)
    }

    pub fn get(&self, intent_id: &str) -> ConvergentResult<Option<Intent>> {
        self.backend.get(intent_id)
    }

    pub fn list_by_agent(&self, agent_id: &str) -> ConvergentResult<Vec<Intent>> {
        self.backend.list_by_agent(agent_id)
    }

    pub fn all(&self) -> ConvergentResult<Vec<Intent>> {
        self.backend.all()
    }

    pub fn count(&self) -> ConvergentResult<u64> {
        self.backend.count()
    }

    /// Intents from other agents that overlap this one, with match
    /// reasons, ordered by publish sequence (earlier intents first).
    pub fn find_overlapping(&self, intent: &Intent) -> ConvergentResult<Vec<OverlapReport>> {
        let specs: Vec<InterfaceSpec> = intent.all_interfaces().cloned().collect();
        // The index narrows by name and tags, which can hide pairs only a
        // semantic matcher would relate; widen to a full scan when one is
        // configured.
        let candidates = if self.semantic.is_some() {
            self.backend
                .all()?
                .into_iter()
                .filter(|other| other.agent_id != intent.agent_id)
                .collect()
        } else {
            self.backend.candidates(&specs, &intent.agent_id)?
        };

        let mut reports = Vec::new();
        for other in candidates {
            let reasons = self.match_reasons(&specs, &other);
            if reasons.is_empty() {
                continue;
            }
            let sequence = self
                .backend
                .sequence_of(&other.intent_id)?
                .unwrap_or(u64::MAX);
            reports.push(OverlapReport {
                intent: other,
                sequence,
                reasons,
            });
        }

        // Tie-breaking prefers earlier intents.
        reports.sort_by_key(|r| r.sequence);
        debug!(count = reports.len(), "overlap query complete");
        Ok(reports)
    }

    /// Classified conflicts between this intent and the graph, as of `now`.
    pub fn find_conflicting_at(
        &self,
        intent: &Intent,
        now: DateTime<Utc>,
    ) -> ConvergentResult<Vec<Conflict>> {
        Ok(self.resolve_at(intent, now)?.conflicts)
    }

    /// Classified conflicts as of the current time.
    pub fn find_conflicting(&self, intent: &Intent) -> ConvergentResult<Vec<Conflict>> {
        self.find_conflicting_at(intent, Utc::now())
    }

    /// Full resolution: overlaps, classified conflicts, recommended
    /// adjustments, and constraints to adopt. Self-exclusion applies — an
    /// agent's intents never conflict with its own.
    #[instrument(skip(self, intent), fields(intent_id = %intent.intent_id))]
    pub fn resolve_at(
        &self,
        intent: &Intent,
        now: DateTime<Utc>,
    ) -> ConvergentResult<ResolutionOutcome> {
        let mut outcome = ResolutionOutcome {
            intent_id: intent.intent_id.clone(),
            ..Default::default()
        };
        let my_stability = self.scorer.score_at(intent, now);

        for report in self.find_overlapping(intent)? {
            let other = &report.intent;
            let their_stability = self.scorer.score_at(other, now);

            let evidence = ConflictEvidence {
                signatures_disagree: self.any_signatures_disagree(intent, other),
                semantically_unrelated: self.semantically_unrelated(intent, other, &report),
                hard_constraint_violated: hard_constraint_violated(intent, other),
                escalation_requested: false,
            };
            let class = classify(&evidence, my_stability, their_stability, self.tie_epsilon);

            let winner = if their_stability > my_stability {
                Some(other.intent_id.clone())
            } else if my_stability > their_stability {
                Some(intent.intent_id.clone())
            } else {
                None
            };

            let detail = report
                .reasons
                .first()
                .map(|r| {
                    format!(
                        "'{}' overlaps '{}' from {} (score {:.2})",
                        r.my_interface, r.their_interface, other.agent_id, r.structural_score
                    )
                })
                .unwrap_or_default();

            // Duplicate provisions: the weaker side should consume or yield.
            let duplicate_provision = intent.provides.iter().any(|mine| {
                other
                    .provides
                    .iter()
                    .any(|theirs| self.specs_overlap(mine, theirs))
            });
            if duplicate_provision && their_stability > my_stability {
                outcome.adjustments.push(Adjustment {
                    kind: AdjustmentKind::ConsumeInstead,
                    description: format!(
                        "consume '{}' from agent {} (stability {:.2}) instead of providing it",
                        first_provided_name(other),
                        other.agent_id,
                        their_stability
                    ),
                    source_intent_id: other.intent_id.clone(),
                });
            }

            // Requirement whose provider signature disagrees: adapt ours
            // when theirs is the more stable side.
            for my_req in &intent.requires {
                for their_prov in &other.provides {
                    if self.specs_overlap(my_req, their_prov)
                        && signatures_disagree(my_req, their_prov)
                        && their_stability > my_stability
                    {
                        outcome.adjustments.push(Adjustment {
                            kind: AdjustmentKind::AdaptSignature,
                            description: format!(
                                "adapt '{}' to the signature of '{}' from agent {}",
                                my_req.name, their_prov.name, other.agent_id
                            ),
                            source_intent_id: other.intent_id.clone(),
                        });
                    }
                }
            }

            if class == convergent_core::ConflictClass::Soft
                && winner.as_deref() == Some(other.intent_id.as_str())
            {
                outcome.adjustments.push(Adjustment {
                    kind: AdjustmentKind::YieldTo,
                    description: format!(
                        "yield to '{}' from agent {} (stability {:.2} vs {:.2})",
                        other.intent_id, other.agent_id, their_stability, my_stability
                    ),
                    source_intent_id: other.intent_id.clone(),
                });
            }

            if class != convergent_core::ConflictClass::None {
                outcome.conflicts.push(Conflict {
                    mine: intent.intent_id.clone(),
                    theirs: other.intent_id.clone(),
                    class,
                    detail,
                    my_stability,
                    their_stability,
                    winner,
                });
            }
        }

        // Constraints from other agents that apply here: adopt the
        // compatible ones; conflicting ones were classified above only if
        // the intents overlap, so check the rest of the graph too.
        for other in self.backend.all()? {
            if other.agent_id == intent.agent_id {
                continue;
            }
            for constraint in &other.constraints {
                if !constraint.applies_to(intent) {
                    continue;
                }
                let conflicting = intent
                    .constraints
                    .iter()
                    .any(|mine| mine.conflicts_with(constraint));
                if conflicting {
                    let their_stability = self.scorer.score_at(&other, now);
                    let class = if constraint.severity == ConstraintSeverity::Hard {
                        convergent_core::ConflictClass::HardConstraint
                    } else {
                        classify(
                            &ConflictEvidence::default(),
                            my_stability,
                            their_stability,
                            self.tie_epsilon,
                        )
                    };
                    if !outcome
                        .conflicts
                        .iter()
                        .any(|c| c.theirs == other.intent_id && c.class == class)
                    {
                        outcome.conflicts.push(Conflict {
                            mine: intent.intent_id.clone(),
                            theirs: other.intent_id.clone(),
                            class,
                            detail: format!("constraint disagreement on '{}'", constraint.subject),
                            my_stability,
                            their_stability,
                            winner: None,
                        });
                    }
                } else if !outcome.adopted_constraints.contains(constraint) {
                    outcome.adopted_constraints.push(constraint.clone());
                    outcome.adjustments.push(Adjustment {
                        kind: AdjustmentKind::AdoptConstraint,
                        description: format!(
                            "adopt constraint on '{}': {}",
                            constraint.subject, constraint.predicate
                        ),
                        source_intent_id: other.intent_id.clone(),
                    });
                }
            }
        }

        info!(
            adjustments = outcome.adjustments.len(),
            conflicts = outcome.conflicts.len(),
            "resolution complete"
        );
        Ok(outcome)
    }

    /// Full resolution as of the current time.
    pub fn resolve(&self, intent: &Intent) -> ConvergentResult<ResolutionOutcome> {
        self.resolve_at(intent, Utc::now())
    }

    fn match_reasons(&self, specs: &[InterfaceSpec], other: &Intent) -> Vec<MatchReason> {
        let mut reasons = Vec::new();
        for mine in specs {
            for theirs in other.all_interfaces() {
                let score = structural_score(mine, theirs);
                let structural_hit = score >= self.match_threshold;

                let semantic = self
                    .semantic
                    .as_ref()
                    .map(|matcher| matcher.relate(mine, theirs));
                let semantic_hit = semantic.as_ref().is_some_and(|v| v.related);

                // OR rule: either signal establishes overlap.
                if structural_hit || semantic_hit {
                    reasons.push(MatchReason {
                        my_interface: mine.name.clone(),
                        their_interface: theirs.name.clone(),
                        structural_score: score,
                        semantic_reason: semantic.filter(|v| v.related).map(|v| v.reason),
                    });
                }
            }
        }
        reasons
    }

    fn specs_overlap(&self, a: &InterfaceSpec, b: &InterfaceSpec) -> bool {
        if structural_score(a, b) >= self.match_threshold {
            return true;
        }
        self.semantic
            .as_ref()
            .is_some_and(|matcher| matcher.relate(a, b).related)
    }

    /// Whether the semantic matcher contradicts a structural match:
    /// structurally overlapping, but judged unrelated.
    fn semantically_unrelated(
        &self,
        intent: &Intent,
        other: &Intent,
        report: &OverlapReport,
    ) -> bool {
        let Some(matcher) = self.semantic.as_ref() else {
            return false;
        };
        report.reasons.iter().any(|reason| {
            if reason.structural_score < self.match_threshold {
                return false;
            }
            let mine = intent
                .all_interfaces()
                .find(|s| s.name == reason.my_interface);
            let theirs = other
                .all_interfaces()
                .find(|s| s.name == reason.their_interface);
            match (mine, theirs) {
                (Some(mine), Some(theirs)) => !matcher.relate(mine, theirs).related,
                _ => false,
            }
        })
    }

    fn any_signatures_disagree(&self, intent: &Intent, other: &Intent) -> bool {
        intent.all_interfaces().any(|mine| {
            other.all_interfaces().any(|theirs| {
                structural_score(mine, theirs) >= self.match_threshold
                    && signatures_disagree(mine, theirs)
            })
        })
    }
}

fn first_provided_name(intent: &Intent) -> String {
    intent
        .provides
        .first()
        .map(|s| s.name.clone())
        .unwrap_or_else(|| intent.intent_id.clone())
}

/// Whether any hard-severity constraint on either side is violated by the
/// other's constraints.
fn hard_constraint_violated(mine: &Intent, theirs: &Intent) -> bool {
    let pair_conflicts = |a: &Intent, b: &Intent| {
        a.constraints.iter().any(|ca| {
            ca.severity == ConstraintSeverity::Hard
                && ca.applies_to(b)
                && b.constraints.iter().any(|cb| cb.conflicts_with(ca))
        })
    };
    pair_conflicts(mine, theirs) || pair_conflicts(theirs, mine)
}
