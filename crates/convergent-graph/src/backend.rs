//! The backend contract every intent store satisfies.

use convergent_core::protocol::{Evidence, Intent, InterfaceSpec};
use convergent_core::ConvergentResult;

/// An ordered, append-only intent store.
///
/// `publish` is idempotent on `intent_id`: re-publishing identical content
/// is a no-op returning the original sequence; re-publishing differing
/// content fails with `DuplicateIntent`. All reads observe a consistent
/// snapshot of the log.
pub trait IntentBackend: Send + Sync {
    /// Append an intent. Returns the store-assigned monotonic sequence
    /// number (total arrival order within the graph).
    fn publish(&self, intent: &Intent) -> ConvergentResult<u64>;

    /// Append evidence to an existing intent — the only in-place mutation.
    fn add_evidence(&self, intent_id: &str, evidence: &Evidence) -> ConvergentResult<()>;

    /// Fetch an intent by id.
    fn get(&self, intent_id: &str) -> ConvergentResult<Option<Intent>>;

    /// The sequence number an intent was published at.
    fn sequence_of(&self, intent_id: &str) -> ConvergentResult<Option<u64>>;

    /// All intents by one agent, in publish order.
    fn list_by_agent(&self, agent_id: &str) -> ConvergentResult<Vec<Intent>>;

    /// Every intent, in publish order.
    fn all(&self) -> ConvergentResult<Vec<Intent>>;

    /// Candidate intents for overlap checking: published by another agent
    /// and plausibly touching one of the given specs. Backends may
    /// over-approximate (the graph re-validates structurally); the SQLite
    /// backend narrows via its denormalized interface index.
    fn candidates(
        &self,
        specs: &[InterfaceSpec],
        exclude_agent: &str,
    ) -> ConvergentResult<Vec<Intent>>;

    /// Number of intents in the store.
    fn count(&self) -> ConvergentResult<u64>;
}
