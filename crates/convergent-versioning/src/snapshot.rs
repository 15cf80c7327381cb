//! Immutable point-in-time captures of the graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use convergent_graph::sqlite::SnapshotRecord;

/// An immutable reference to the ordered intent set at a point in time.
///
/// The snapshot id is deterministic: the blake3 hash of the ordered
/// intent-id sequence. Two snapshots with the same id contain the same
/// intents in the same publish order. A merge snapshot has two parents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub snapshot_id: String,
    pub parent_ids: Vec<String>,
    /// Intent ids in publish order.
    pub intent_ids: Vec<String>,
    pub branch: String,
    pub created_at: DateTime<Utc>,
}

impl GraphSnapshot {
    /// The deterministic id for an ordered intent-id sequence.
    pub fn compute_id(intent_ids: &[String]) -> String {
        let mut hasher = blake3::Hasher::new();
        for id in intent_ids {
            hasher.update(id.as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }

    pub fn intent_count(&self) -> usize {
        self.intent_ids.len()
    }
}

impl From<&GraphSnapshot> for SnapshotRecord {
    fn from(snapshot: &GraphSnapshot) -> Self {
        SnapshotRecord {
            snapshot_id: snapshot.snapshot_id.clone(),
            parent_ids: snapshot.parent_ids.clone(),
            intent_ids: snapshot.intent_ids.clone(),
            branch: snapshot.branch.clone(),
            created_at: snapshot.created_at,
        }
    }
}
