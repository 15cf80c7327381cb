//! Flocking — three local rule checks that shape an agent's prompt.
//!
//! - **Alignment**: style constraints from `pattern_found` markers on the
//!   agent's files.
//! - **Cohesion**: keyword-Jaccard drift between the task description and
//!   the agent's current working summary.
//! - **Separation**: write contention from other agents' recent
//!   `file_modified` markers.
//!
//! The coordinator consumes a read-only view of the stigmergy field and
//! never calls back into the bridge; outputs are plain text constraints
//! composable into a prompt.

use convergent_core::protocol::MarkerType;
use convergent_core::ConvergentResult;

use crate::stigmergy::StigmergyField;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "shall", "should", "may", "might", "can", "could",
    "of", "in", "to", "for", "on", "with", "at", "by", "from", "as", "into", "through",
    "during", "before", "after", "above", "below", "between", "and", "or", "but", "not", "no",
    "nor", "so", "yet", "both", "either", "neither", "each", "every", "all", "any", "few",
    "more", "most", "other", "some", "such", "than", "too", "very", "it", "its", "this",
    "that", "these", "those", "what", "which", "who", "how", "when", "where", "why", "if",
    "then", "else",
];

/// Swarm coordination through alignment, cohesion, and separation.
pub struct FlockingCoordinator<'a> {
    stigmergy: &'a StigmergyField,
    /// Minimum marker strength for a file to count as actively modified.
    separation_threshold: f64,
    /// Drift above this triggers a cohesion warning.
    drift_threshold: f64,
}

impl<'a> FlockingCoordinator<'a> {
    pub fn new(stigmergy: &'a StigmergyField) -> Self {
        Self {
            stigmergy,
            separation_threshold: 0.3,
            drift_threshold: 0.5,
        }
    }

    pub fn with_thresholds(mut self, separation: f64, drift: f64) -> Self {
        self.separation_threshold = separation;
        self.drift_threshold = drift;
        self
    }

    /// Style constraints from other agents' `pattern_found` markers on the
    /// given files, deduplicated.
    pub fn check_alignment(
        &self,
        agent_id: &str,
        file_paths: &[String],
    ) -> ConvergentResult<Vec<String>> {
        let mut constraints: Vec<String> = Vec::new();
        for path in file_paths {
            for marker in self.stigmergy.markers_for(path)? {
                if marker.marker_type != MarkerType::PatternFound {
                    continue;
                }
                if marker.agent_id == agent_id {
                    continue;
                }
                if !constraints.contains(&marker.content) {
                    constraints.push(marker.content);
                }
            }
        }
        Ok(constraints)
    }

    /// Drift between the original task and the current work, in [0, 1]:
    /// one minus the Jaccard overlap of their keyword sets. Zero when
    /// either side has no keywords.
    pub fn check_cohesion(&self, task_description: &str, current_work: &str) -> f64 {
        let task: std::collections::HashSet<String> =
            extract_keywords(task_description).into_iter().collect();
        let work: std::collections::HashSet<String> =
            extract_keywords(current_work).into_iter().collect();
        if task.is_empty() || work.is_empty() {
            return 0.0;
        }
        let overlap = task.intersection(&work).count();
        let union = task.union(&work).count();
        if union == 0 {
            return 0.0;
        }
        1.0 - overlap as f64 / union as f64
    }

    /// Files on the agent's plan that another agent is actively modifying
    /// (a `file_modified` marker at or above the separation threshold).
    pub fn check_separation(
        &self,
        agent_id: &str,
        file_paths: &[String],
    ) -> ConvergentResult<Vec<String>> {
        let mut contended = Vec::new();
        for path in file_paths {
            let hit = self.stigmergy.markers_for(path)?.into_iter().any(|m| {
                m.marker_type == MarkerType::FileModified
                    && m.agent_id != agent_id
                    && m.strength >= self.separation_threshold
            });
            if hit {
                contended.push(path.clone());
            }
        }
        Ok(contended)
    }

    /// Combine all three rules into one prompt-ready constraint block.
    /// Empty when nothing applies.
    pub fn generate_constraints(
        &self,
        agent_id: &str,
        task_description: &str,
        current_work: &str,
        file_paths: &[String],
    ) -> ConvergentResult<String> {
        let mut sections: Vec<String> = Vec::new();

        let patterns = self.check_alignment(agent_id, file_paths)?;
        if !patterns.is_empty() {
            let mut lines = vec!["### Alignment (follow these patterns)".to_string()];
            lines.extend(patterns.into_iter().map(|p| format!("- {p}")));
            sections.push(lines.join("\n"));
        }

        let drift = self.check_cohesion(task_description, current_work);
        if drift > self.drift_threshold {
            sections.push(format!(
                "### Cohesion warning (drift={drift:.2})\n\
                 Your current work may be drifting from the original task. \
                 Re-focus on: {task_description}"
            ));
        }

        let contended = self.check_separation(agent_id, file_paths)?;
        if !contended.is_empty() {
            let mut lines = vec!["### Separation (avoid these files)".to_string()];
            lines.extend(
                contended
                    .into_iter()
                    .map(|f| format!("- `{f}` is being modified by another agent")),
            );
            sections.push(lines.join("\n"));
        }

        if sections.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("## Flocking constraints\n\n{}", sections.join("\n\n")))
    }
}

/// Lowercase alphanumeric/underscore tokens longer than two characters,
/// minus stop words.
fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            current.push(c.to_ascii_lowercase());
        } else if !current.is_empty() {
            push_keyword(&mut keywords, std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        push_keyword(&mut keywords, current);
    }
    keywords
}

fn push_keyword(keywords: &mut Vec<String>, word: String) {
    if word.len() > 2
        && !word.chars().next().is_some_and(|c| c.is_ascii_digit())
        && !STOP_WORDS.contains(&word.as_str())
    {
        keywords.push(word);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_drop_stop_words_and_short_tokens() {
        let words = extract_keywords("Fix the login handler in auth.rs");
        assert_eq!(words, vec!["fix", "login", "handler", "auth"]);
    }

    #[test]
    fn identical_texts_have_zero_drift() {
        let config = convergent_core::CoordinationConfig::default();
        let field = StigmergyField::open_in_memory(&config).unwrap();
        let flocking = FlockingCoordinator::new(&field);
        assert_eq!(
            flocking.check_cohesion("fix the auth handler", "fix the auth handler"),
            0.0
        );
    }

    #[test]
    fn disjoint_texts_have_full_drift() {
        let config = convergent_core::CoordinationConfig::default();
        let field = StigmergyField::open_in_memory(&config).unwrap();
        let flocking = FlockingCoordinator::new(&field);
        let drift = flocking.check_cohesion("fix authentication login", "render dashboard charts");
        assert!((drift - 1.0).abs() < f64::EPSILON);
    }
}
