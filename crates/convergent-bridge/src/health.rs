//! Coordination health report — aggregated metrics from every subsystem
//! with issue detection and an A–F grade.

use convergent_consensus::DecisionStore;
use convergent_core::ConvergentResult;
use convergent_graph::IntentGraph;
use convergent_scoring::{ScoreStore, StabilityScorer};
use convergent_swarm::StigmergyField;

/// Metrics for the intent graph layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentGraphHealth {
    pub total_intents: u64,
    pub agent_count: u64,
    pub avg_stability: f64,
    pub min_stability: f64,
    pub max_stability: f64,
    pub overlapping_pairs: u64,
    pub provides_count: u64,
    pub requires_count: u64,
}

/// Metrics for the stigmergy field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StigmergyHealth {
    pub total_markers: u64,
    pub markers_by_type: Vec<(String, u64)>,
    pub avg_strength: f64,
}

/// Metrics for phi scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringHealth {
    pub scored_agents: u64,
    pub total_outcomes: u64,
    pub avg_score: f64,
    pub min_score: f64,
    pub max_score: f64,
}

/// Metrics for the voting system.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VotingHealth {
    pub total_decisions: u64,
    pub approval_rate: f64,
    pub escalation_count: u64,
    pub deadlock_count: u64,
}

/// The aggregated report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinationHealth {
    pub intent_graph: IntentGraphHealth,
    pub stigmergy: StigmergyHealth,
    pub scoring: ScoringHealth,
    pub voting: VotingHealth,
    /// A (no issues) down to F, one grade per detected issue.
    pub grade: char,
    pub issues: Vec<String>,
}

/// Aggregates health metrics from whichever subsystems are wired in.
pub struct HealthChecker<'a> {
    graph: Option<&'a IntentGraph>,
    stigmergy: Option<&'a StigmergyField>,
    scores: Option<&'a ScoreStore>,
    decisions: Option<&'a DecisionStore>,
}

impl<'a> HealthChecker<'a> {
    pub fn new() -> Self {
        Self {
            graph: None,
            stigmergy: None,
            scores: None,
            decisions: None,
        }
    }

    pub fn with_graph(mut self, graph: &'a IntentGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_stigmergy(mut self, stigmergy: &'a StigmergyField) -> Self {
        self.stigmergy = Some(stigmergy);
        self
    }

    pub fn with_scores(mut self, scores: &'a ScoreStore) -> Self {
        self.scores = Some(scores);
        self
    }

    pub fn with_decisions(mut self, decisions: &'a DecisionStore) -> Self {
        self.decisions = Some(decisions);
        self
    }

    /// Run the checks across every configured subsystem.
    pub fn check(&self) -> ConvergentResult<CoordinationHealth> {
        let mut issues = Vec::new();

        let intent_graph = self.check_graph(&mut issues)?;
        let stigmergy = self.check_stigmergy(&mut issues)?;
        let scoring = self.check_scoring(&mut issues)?;
        let voting = self.check_voting(&mut issues)?;

        let grade = grade_for(issues.len());
        Ok(CoordinationHealth {
            intent_graph,
            stigmergy,
            scoring,
            voting,
            grade,
            issues,
        })
    }

    fn check_graph(&self, issues: &mut Vec<String>) -> ConvergentResult<IntentGraphHealth> {
        let Some(graph) = self.graph else {
            return Ok(IntentGraphHealth::default());
        };
        let intents = graph.all()?;
        if intents.is_empty() {
            return Ok(IntentGraphHealth::default());
        }

        let scorer: &StabilityScorer = graph.scorer();
        let now = chrono::Utc::now();
        let stabilities: Vec<f64> = intents.iter().map(|i| scorer.score_at(i, now)).collect();
        let agents: std::collections::HashSet<&str> =
            intents.iter().map(|i| i.agent_id.as_str()).collect();

        let mut overlapping_pairs = 0u64;
        for (index, intent) in intents.iter().enumerate() {
            for other in intents.iter().skip(index + 1) {
                if intent.agent_id == other.agent_id {
                    continue;
                }
                let hit = intent.all_interfaces().any(|mine| {
                    other.all_interfaces().any(|theirs| {
                        convergent_core::matching::structural_score(mine, theirs) >= 0.6
                    })
                });
                if hit {
                    overlapping_pairs += 1;
                }
            }
        }

        let avg = stabilities.iter().sum::<f64>() / stabilities.len() as f64;
        if avg < 0.3 {
            issues.push(format!("low average intent stability: {avg:.2}"));
        }
        if overlapping_pairs > intents.len() as u64 {
            issues.push(format!(
                "high interface contention: {overlapping_pairs} overlapping pairs"
            ));
        }

        Ok(IntentGraphHealth {
            total_intents: intents.len() as u64,
            agent_count: agents.len() as u64,
            avg_stability: avg,
            min_stability: stabilities.iter().copied().fold(f64::INFINITY, f64::min),
            max_stability: stabilities.iter().copied().fold(0.0, f64::max),
            overlapping_pairs,
            provides_count: intents.iter().map(|i| i.provides.len() as u64).sum(),
            requires_count: intents.iter().map(|i| i.requires.len() as u64).sum(),
        })
    }

    fn check_stigmergy(&self, issues: &mut Vec<String>) -> ConvergentResult<StigmergyHealth> {
        let Some(field) = self.stigmergy else {
            return Ok(StigmergyHealth::default());
        };
        let total = field.count()?;
        if total == 0 {
            return Ok(StigmergyHealth::default());
        }
        let avg_strength = field.avg_strength()?;
        if avg_strength < 0.1 {
            issues.push(format!(
                "stigmergy field is mostly evaporated (avg strength {avg_strength:.2})"
            ));
        }
        Ok(StigmergyHealth {
            total_markers: total,
            markers_by_type: field.counts_by_type()?,
            avg_strength,
        })
    }

    fn check_scoring(&self, issues: &mut Vec<String>) -> ConvergentResult<ScoringHealth> {
        let Some(store) = self.scores else {
            return Ok(ScoringHealth::default());
        };
        let agents = store.scored_agents()?;
        if agents.is_empty() {
            return Ok(ScoringHealth::default());
        }

        let mut all_scores = Vec::new();
        for agent in &agents {
            for (_, score) in store.all_scores(agent)? {
                all_scores.push(score);
            }
        }
        let avg = all_scores.iter().sum::<f64>() / all_scores.len().max(1) as f64;
        if avg < 0.3 {
            issues.push(format!("fleet-wide trust is low (avg phi {avg:.2})"));
        }
        Ok(ScoringHealth {
            scored_agents: agents.len() as u64,
            total_outcomes: store.outcome_count()?,
            avg_score: avg,
            min_score: all_scores.iter().copied().fold(f64::INFINITY, f64::min),
            max_score: all_scores.iter().copied().fold(0.0, f64::max),
        })
    }

    fn check_voting(&self, issues: &mut Vec<String>) -> ConvergentResult<VotingHealth> {
        let Some(store) = self.decisions else {
            return Ok(VotingHealth::default());
        };
        let decisions = store.decision_history(None, None, 1000)?;
        if decisions.is_empty() {
            return Ok(VotingHealth::default());
        }

        let total = decisions.len() as u64;
        let approved = decisions
            .iter()
            .filter(|d| d.outcome == convergent_core::DecisionOutcome::Approved)
            .count() as u64;
        let escalated = decisions
            .iter()
            .filter(|d| d.outcome == convergent_core::DecisionOutcome::Escalated)
            .count() as u64;
        let deadlocked = decisions
            .iter()
            .filter(|d| d.outcome == convergent_core::DecisionOutcome::Deadlock)
            .count() as u64;

        if deadlocked * 2 > total {
            issues.push(format!("{deadlocked}/{total} recent decisions deadlocked"));
        }
        Ok(VotingHealth {
            total_decisions: total,
            approval_rate: approved as f64 / total as f64,
            escalation_count: escalated,
            deadlock_count: deadlocked,
        })
    }
}

impl Default for HealthChecker<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// One grade down per detected issue, floored at F.
fn grade_for(issue_count: usize) -> char {
    match issue_count {
        0 => 'A',
        1 => 'B',
        2 => 'C',
        3 => 'D',
        _ => 'F',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_step_down_with_issue_count() {
        assert_eq!(grade_for(0), 'A');
        assert_eq!(grade_for(1), 'B');
        assert_eq!(grade_for(2), 'C');
        assert_eq!(grade_for(3), 'D');
        assert_eq!(grade_for(4), 'F');
        assert_eq!(grade_for(9), 'F');
    }

    #[test]
    fn empty_checker_reports_a_clean_slate() {
        let health = HealthChecker::new().check().unwrap();
        assert_eq!(health.grade, 'A');
        assert!(health.issues.is_empty());
    }
}
