//! # convergent-bridge
//!
//! The single externally consumed surface of the coordination engine.
//! [`CoordinationBridge`] composes the intent graph, phi scoring,
//! consensus voting, stigmergy, flocking, the signal bus, and the merge
//! governor, and degrades gracefully when a subsystem is disabled.
//! The coordination event log and the health report live here too.

pub mod bridge;
pub mod events;
pub mod health;

pub use bridge::CoordinationBridge;
pub use events::{CoordinationEvent, EventCursor, EventLog, EventType};
pub use health::{CoordinationHealth, HealthChecker};
