//! # convergent-core
//!
//! Foundation crate for the Convergent coordination engine.
//! Defines the protocol models, error taxonomy, configuration, structural
//! matching, and conflict classification. Every other crate in the
//! workspace depends on this.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod matching;
pub mod protocol;

// Re-export the most commonly used types at the crate root.
pub use config::{CoordinationConfig, EvidenceWeights, SignalBackendKind};
pub use conflict::{Conflict, ConflictClass};
pub use errors::{ConvergentError, ConvergentResult};
pub use protocol::{
    AgentIdentity, ConsensusRequest, Constraint, ConstraintSeverity, Decision, DecisionOutcome,
    Evidence, EvidenceKind, Intent, IntentCategory, InterfaceKind, InterfaceSpec, MarkerType,
    QuorumLevel, Signal, StigmergyMarker, Vote, VoteChoice,
};
