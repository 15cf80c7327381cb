//! # convergent-swarm
//!
//! Indirect coordination between agents:
//!
//! - [`StigmergyField`] — decaying, reinforceable trail markers.
//! - [`FlockingCoordinator`] — alignment / cohesion / separation checks
//!   over a read-only view of the stigmergy field.
//! - [`SignalBus`] — pub/sub with memory, filesystem, and SQLite
//!   backends, at-least-once delivery, per-consumer timestamp order.
//! - [`Sweeper`] — background evaporation and signal cleanup with an
//!   explicit start/stop lifecycle and a deterministic test-mode tick.

pub mod flocking;
pub mod signal;
pub mod stigmergy;
pub mod sweeper;

pub use flocking::FlockingCoordinator;
pub use signal::{FilesystemSignalBackend, MemorySignalBackend, SignalBackend, SignalBus, SqliteSignalBackend};
pub use stigmergy::StigmergyField;
pub use sweeper::Sweeper;
