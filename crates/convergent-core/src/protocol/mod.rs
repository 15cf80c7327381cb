//! Protocol models — the "words" agents use to coordinate.
//!
//! Every entity has a canonical JSON form: field order follows declaration
//! order, booleans and enum values are lowercase, timestamps are RFC 3339
//! UTC. Round-trip is exact on every field.

mod consensus;
mod intent;
mod swarm;

pub use consensus::{
    AgentIdentity, ConsensusRequest, Decision, DecisionOutcome, QuorumLevel, Vote, VoteChoice,
};
pub use intent::{
    Constraint, ConstraintSeverity, Evidence, EvidenceKind, Intent, IntentCategory, InterfaceKind,
    InterfaceSpec,
};
pub use swarm::{MarkerType, Signal, StigmergyMarker};
