//! # convergent-scoring
//!
//! Two scorers and their persistence:
//!
//! - [`StabilityScorer`] — derived confidence in an intent from its
//!   evidence list, with exponential temporal decay.
//! - [`PhiScorer`] — Bayesian-smoothed, decaying trust per
//!   `(agent, skill_domain)`, used to weight consensus votes.
//!
//! Both take an explicit `now` on their computation paths so tests drive
//! the clock; convenience wrappers use `Utc::now()`.

pub mod phi;
pub mod stability;
pub mod store;

pub use phi::{PhiScorer, TaskOutcome};
pub use stability::StabilityScorer;
pub use store::ScoreStore;
