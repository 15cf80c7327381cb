//! # convergent-consensus
//!
//! The Triumvirate voting engine: consensus requests, phi-weighted votes,
//! quorum evaluation, and persisted decisions. Works with any number of
//! voting agents — the name references shared authority, not the count.

pub mod store;
pub mod triumvirate;

pub use store::{DecisionStore, VoteStats};
pub use triumvirate::Triumvirate;
