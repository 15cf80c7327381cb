//! # convergent-governor
//!
//! The three-layer merge decision pipeline:
//!
//! 1. **Constraints** — hard truth via gate verdicts. Any hard violation
//!    rejects outright.
//! 2. **Intents** — conflict classification against the shared graph.
//! 3. **Economics** — expected-value comparison of auto-resolving vs
//!    escalating, under a budget.
//!
//! Layers run in strict order and short-circuit on the first decisive
//! verdict. Every outcome carries full rationale.

pub mod constraints;
pub mod economics;
pub mod gates;
pub mod governor;

pub use constraints::{ConstraintCheck, ConstraintEngine, ConstraintKind, ConstraintReport, TypedConstraint};
pub use economics::{Budget, CostModel, EscalationAction, EscalationDecision, EscalationPolicy};
pub use gates::{Gate, GateScope, GateVerdict};
pub use governor::{GovernorLayer, GovernorOutcome, GovernorReport, MergeGovernor};
