//! The versioned graph: branches, sealing, and classified merges.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use convergent_core::protocol::{Evidence, Intent};
use convergent_core::{Conflict, ConflictClass, ConvergentResult, CoordinationConfig};
use convergent_graph::{IntentGraph, MemoryBackend};

use crate::snapshot::GraphSnapshot;

/// Result of merging one branch into another.
///
/// A new snapshot exists if and only if every incoming intent was
/// conflict-free with the base or classified SOFT/NONE. Conflicts of kind
/// STRUCTURAL, SEMANTIC, or AMBIGUOUS come back for resolution via the
/// governor; a HARD_CONSTRAINT conflict aborts the merge outright.
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    /// Intent ids merged into the base, in replay order.
    pub merged: Vec<String>,
    /// Conflicts the caller must resolve before retrying.
    pub unresolved: Vec<Conflict>,
    /// The hard-constraint conflict that aborted the merge, if any.
    pub aborted_by: Option<Conflict>,
    /// The merge snapshot, present only on success.
    pub snapshot: Option<GraphSnapshot>,
}

impl MergeResult {
    pub fn success(&self) -> bool {
        self.snapshot.is_some()
    }
}

/// An intent graph with snapshot, branch, and merge support.
pub struct VersionedGraph {
    branch_name: String,
    graph: IntentGraph,
    config: CoordinationConfig,
    snapshots: Vec<GraphSnapshot>,
    head: Option<String>,
}

impl VersionedGraph {
    /// A fresh versioned graph on an in-memory backend.
    pub fn new(branch_name: &str, config: &CoordinationConfig) -> Self {
        Self {
            branch_name: branch_name.to_string(),
            graph: IntentGraph::new(Box::new(MemoryBackend::new()), config),
            config: config.clone(),
            snapshots: Vec::new(),
            head: None,
        }
    }

    /// Wrap an existing intent graph (e.g. one on the SQLite backend).
    pub fn with_graph(branch_name: &str, graph: IntentGraph, config: &CoordinationConfig) -> Self {
        Self {
            branch_name: branch_name.to_string(),
            graph,
            config: config.clone(),
            snapshots: Vec::new(),
            head: None,
        }
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn graph(&self) -> &IntentGraph {
        &self.graph
    }

    /// All snapshots sealed on this branch, oldest first.
    pub fn snapshots(&self) -> &[GraphSnapshot] {
        &self.snapshots
    }

    /// The current head snapshot id, if any state has been sealed.
    pub fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }

    /// Publish an intent on this branch. Returns its stability.
    pub fn publish(&self, intent: &Intent) -> ConvergentResult<f64> {
        self.graph.publish(intent)
    }

    /// Append evidence to a published intent.
    pub fn add_evidence(&self, intent_id: &str, evidence: &Evidence) -> ConvergentResult<()> {
        self.graph.add_evidence(intent_id, evidence)
    }

    /// The ordered intent-id sequence of the current state.
    pub fn intent_ids(&self) -> ConvergentResult<Vec<String>> {
        Ok(self
            .graph
            .all()?
            .into_iter()
            .map(|i| i.intent_id)
            .collect())
    }

    /// Seal the current state as an immutable snapshot. Sealing an
    /// unchanged state returns the existing head snapshot.
    pub fn seal_at(&mut self, now: DateTime<Utc>) -> ConvergentResult<GraphSnapshot> {
        let intent_ids = self.intent_ids()?;
        let snapshot_id = GraphSnapshot::compute_id(&intent_ids);

        if self.head.as_deref() == Some(snapshot_id.as_str()) {
            if let Some(existing) = self.snapshots.iter().find(|s| s.snapshot_id == snapshot_id)
            {
                return Ok(existing.clone());
            }
        }

        let snapshot = GraphSnapshot {
            snapshot_id: snapshot_id.clone(),
            parent_ids: self.head.iter().cloned().collect(),
            intent_ids,
            branch: self.branch_name.clone(),
            created_at: now,
        };
        self.snapshots.push(snapshot.clone());
        self.head = Some(snapshot_id);
        debug!(branch = %self.branch_name, snapshot_id = %snapshot.snapshot_id, "state sealed");
        Ok(snapshot)
    }

    /// Seal the current state as of the current time.
    pub fn seal(&mut self) -> ConvergentResult<GraphSnapshot> {
        self.seal_at(Utc::now())
    }

    /// Create a named branch from the current state: an independent copy
    /// of every intent, sharing this branch's head as its parent.
    #[instrument(skip(self))]
    pub fn branch(&self, name: &str) -> ConvergentResult<VersionedGraph> {
        let copy = VersionedGraph::new(name, &self.config);
        for intent in self.graph.all()? {
            copy.graph.publish(&intent)?;
        }
        let mut copy = copy;
        copy.head = self.head.clone();
        info!(from = %self.branch_name, to = name, "branch created");
        Ok(copy)
    }

    /// Merge another branch's new intents into this graph, classifying
    /// conflicts against a staging copy before touching real state.
    #[instrument(skip(self, incoming), fields(base = %self.branch_name, incoming = %incoming.branch_name))]
    pub fn merge_at(
        &mut self,
        incoming: &VersionedGraph,
        now: DateTime<Utc>,
    ) -> ConvergentResult<MergeResult> {
        let base_ids: Vec<String> = self.intent_ids()?;
        let new_intents: Vec<Intent> = incoming
            .graph
            .all()?
            .into_iter()
            .filter(|i| !base_ids.contains(&i.intent_id))
            .collect();

        let mut result = MergeResult::default();

        // Stage the merge on a scratch copy so an abort leaves no trace.
        let staging = self.branch("merge-staging")?;
        for intent in &new_intents {
            let conflicts = staging.graph.find_conflicting_at(intent, now)?;

            if let Some(hard) = conflicts
                .iter()
                .find(|c| c.class == ConflictClass::HardConstraint)
            {
                warn!(intent_id = %intent.intent_id, "merge aborted by hard constraint");
                result.aborted_by = Some(hard.clone());
                result.merged.clear();
                result.unresolved.clear();
                return Ok(result);
            }

            let blocking: Vec<Conflict> = conflicts
                .into_iter()
                .filter(|c| !c.class.mergeable())
                .collect();
            if blocking.is_empty() {
                staging.graph.publish(intent)?;
                result.merged.push(intent.intent_id.clone());
            } else {
                result.unresolved.extend(blocking);
            }
        }

        if !result.unresolved.is_empty() {
            // Returned to the caller for resolution via the governor.
            result.merged.clear();
            return Ok(result);
        }

        // All incoming intents are mergeable: apply to the real base.
        for intent in &new_intents {
            self.graph.publish(intent)?;
        }

        let incoming_head = incoming.head.clone();
        let intent_ids = self.intent_ids()?;
        let snapshot_id = GraphSnapshot::compute_id(&intent_ids);
        let mut parent_ids: Vec<String> = self.head.iter().cloned().collect();
        if let Some(parent) = incoming_head {
            if !parent_ids.contains(&parent) {
                parent_ids.push(parent);
            }
        }
        let snapshot = GraphSnapshot {
            snapshot_id: snapshot_id.clone(),
            parent_ids,
            intent_ids,
            branch: self.branch_name.clone(),
            created_at: now,
        };
        self.snapshots.push(snapshot.clone());
        self.head = Some(snapshot_id);
        info!(
            merged = result.merged.len(),
            snapshot_id = %snapshot.snapshot_id,
            "merge sealed"
        );
        result.snapshot = Some(snapshot);
        Ok(result)
    }

    /// Merge as of the current time.
    pub fn merge(&mut self, incoming: &VersionedGraph) -> ConvergentResult<MergeResult> {
        self.merge_at(incoming, Utc::now())
    }

    /// Persist this branch's snapshots and head ref into the intent store.
    pub fn persist_snapshots(
        &self,
        store: &convergent_graph::SqliteBackend,
    ) -> ConvergentResult<()> {
        for snapshot in &self.snapshots {
            store.save_snapshot(&snapshot.into())?;
        }
        if let Some(head) = &self.head {
            store.set_branch(&self.branch_name, head)?;
        }
        Ok(())
    }
}
