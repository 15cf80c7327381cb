//! Deterministic replay: same ordered inputs + same policy parameters ⇒
//! the same snapshots, byte for byte. Divergence aborts the replay with
//! the first differing snapshot pair.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use convergent_core::protocol::Intent;
use convergent_core::{ConvergentError, ConvergentResult, CoordinationConfig};

use crate::snapshot::GraphSnapshot;
use crate::versioned::VersionedGraph;

/// One recorded operation in the replay log.
#[derive(Debug, Clone)]
pub enum ReplayEntry {
    /// A direct publish into the graph.
    Publish { intent: Intent },
    /// A merge of ordered incoming intents, with the snapshot it sealed
    /// and the evaluation time its classifications used.
    Merge {
        incoming: Vec<Intent>,
        evaluated_at: DateTime<Utc>,
        recorded_snapshot: String,
    },
}

/// Ordered log of graph operations plus the policy needed to replay them.
pub struct ReplayLog {
    config: CoordinationConfig,
    entries: Vec<ReplayEntry>,
}

impl ReplayLog {
    pub fn new(config: &CoordinationConfig) -> Self {
        Self {
            config: config.clone(),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ReplayEntry] {
        &self.entries
    }

    /// Record a publish operation.
    pub fn record_publish(&mut self, intent: &Intent) {
        self.entries.push(ReplayEntry::Publish {
            intent: intent.clone(),
        });
    }

    /// Record a sealed merge: the ordered incoming intents, the time the
    /// merge was evaluated, and the snapshot id it produced.
    pub fn record_merge(
        &mut self,
        incoming: &[Intent],
        evaluated_at: DateTime<Utc>,
        snapshot: &GraphSnapshot,
    ) {
        self.entries.push(ReplayEntry::Merge {
            incoming: incoming.to_vec(),
            evaluated_at,
            recorded_snapshot: snapshot.snapshot_id.clone(),
        });
    }

    /// Replay every recorded operation against a fresh graph and verify
    /// each merge reproduces its recorded snapshot.
    pub fn replay(&self) -> ConvergentResult<GraphSnapshot> {
        let mut base = VersionedGraph::new("replay", &self.config);
        let mut merge_index = 0usize;

        for entry in &self.entries {
            match entry {
                ReplayEntry::Publish { intent } => {
                    base.publish(intent)?;
                }
                ReplayEntry::Merge {
                    incoming,
                    evaluated_at,
                    recorded_snapshot,
                } => {
                    let mut branch = base.branch("replay-incoming")?;
                    for intent in incoming {
                        branch.publish(intent)?;
                    }
                    branch.seal_at(*evaluated_at)?;

                    let result = base.merge_at(&branch, *evaluated_at)?;
                    let recomputed = result
                        .snapshot
                        .as_ref()
                        .map(|s| s.snapshot_id.clone())
                        .unwrap_or_else(|| "unmerged".to_string());

                    if recomputed != *recorded_snapshot {
                        return Err(ConvergentError::ReplayDivergence {
                            index: merge_index,
                            recorded: recorded_snapshot.clone(),
                            recomputed,
                        });
                    }
                    debug!(merge_index, snapshot = %recomputed, "merge replayed");
                    merge_index += 1;
                }
            }
        }

        let snapshot = base.seal_at(
            self.entries
                .iter()
                .rev()
                .find_map(|e| match e {
                    ReplayEntry::Merge { evaluated_at, .. } => Some(*evaluated_at),
                    _ => None,
                })
                .unwrap_or_else(Utc::now),
        )?;
        info!(entries = self.entries.len(), snapshot = %snapshot.snapshot_id, "replay complete");
        Ok(snapshot)
    }
}

/// Merge an ordered intent sequence into a fresh graph, one branch per
/// intent, sealing after each merge. Returns the final snapshot. The
/// replay of a log recorded from this operation reproduces it exactly.
pub fn merge_all(
    sequence: &[Intent],
    config: &CoordinationConfig,
    evaluated_at: DateTime<Utc>,
) -> ConvergentResult<(GraphSnapshot, ReplayLog)> {
    let mut base = VersionedGraph::new("main", config);
    let mut log = ReplayLog::new(config);

    for intent in sequence {
        let mut branch = base.branch("incoming")?;
        branch.publish(intent)?;
        branch.seal_at(evaluated_at)?;

        let result = base.merge_at(&branch, evaluated_at)?;
        match &result.snapshot {
            Some(snapshot) => {
                log.record_merge(std::slice::from_ref(intent), evaluated_at, snapshot)
            }
            None => {
                return Err(ConvergentError::ConflictUnresolved {
                    mine: intent.intent_id.clone(),
                    theirs: result
                        .unresolved
                        .first()
                        .map(|c| c.theirs.clone())
                        .unwrap_or_default(),
                    class: result
                        .unresolved
                        .first()
                        .map(|c| c.class.as_str().to_string())
                        .unwrap_or_else(|| "hard_constraint".to_string()),
                })
            }
        }
    }

    let snapshot = base.seal_at(evaluated_at)?;
    Ok((snapshot, log))
}
