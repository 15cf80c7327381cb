//! Pub/sub signal bus with a runtime-selectable backend.
//!
//! Delivery is at-least-once, per-consumer in non-decreasing timestamp
//! order, and durable across restarts on the persistent backends.
//! `poll_once` is the deterministic test-mode tick; background polling
//! runs on a [`crate::Sweeper`].

mod filesystem;
mod memory;
mod sqlite;

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use convergent_core::protocol::Signal;
use convergent_core::{ConvergentError, ConvergentResult};

pub use filesystem::FilesystemSignalBackend;
pub use memory::MemorySignalBackend;
pub use sqlite::SqliteSignalBackend;

/// Storage behind the signal bus.
///
/// `unprocessed` returns signals the consumer has not acknowledged, in
/// non-decreasing timestamp order; `mark_processed` acknowledges them.
/// A signal delivered but not yet acknowledged may be delivered again —
/// at-least-once, never silently dropped.
pub trait SignalBackend: Send + Sync {
    fn store(&self, signal: &Signal) -> ConvergentResult<()>;

    fn unprocessed(&self, consumer_id: &str) -> ConvergentResult<Vec<(String, Signal)>>;

    fn mark_processed(&self, consumer_id: &str, ack_ids: &[String]) -> ConvergentResult<()>;

    /// All signals matching the filters, oldest first.
    fn signals(
        &self,
        signal_type: Option<&str>,
        source_agent: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> ConvergentResult<Vec<Signal>>;

    /// Remove signals older than `max_age_seconds` as of `now`. Returns
    /// the removal count.
    fn sweep_expired(&self, max_age_seconds: u64, now: DateTime<Utc>) -> ConvergentResult<usize>;
}

type Callback = Box<dyn Fn(&Signal) + Send + Sync>;

struct Subscriber {
    callback: Callback,
    /// When set, targeted signals are only delivered to this agent;
    /// broadcasts are delivered regardless.
    agent_id: Option<String>,
}

/// The signal bus: publish typed signals, subscribe callbacks by type,
/// drain with `poll_once`.
pub struct SignalBus {
    backend: Box<dyn SignalBackend>,
    consumer_id: String,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl SignalBus {
    pub fn new(backend: Box<dyn SignalBackend>, consumer_id: &str) -> Self {
        Self {
            backend,
            consumer_id: consumer_id.to_string(),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &dyn SignalBackend {
        self.backend.as_ref()
    }

    /// Publish a signal to the bus.
    pub fn publish(&self, signal: &Signal) -> ConvergentResult<()> {
        self.backend.store(signal)?;
        info!(
            signal_type = %signal.signal_type,
            source = %signal.source_agent,
            target = signal.target_agent.as_deref().unwrap_or("broadcast"),
            "signal published"
        );
        Ok(())
    }

    /// Register a callback for a signal type. `agent_id` scopes delivery
    /// of targeted signals to that agent; broadcasts always deliver.
    pub fn subscribe<F>(&self, signal_type: &str, agent_id: Option<&str>, callback: F)
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers
            .entry(signal_type.to_string())
            .or_default()
            .push(Subscriber {
                callback: Box::new(callback),
                agent_id: agent_id.map(String::from),
            });
        debug!(signal_type, agent_id = agent_id.unwrap_or("any"), "subscribed");
    }

    /// One deterministic poll tick: fetch unacknowledged signals in
    /// timestamp order, dispatch to matching subscribers, acknowledge.
    /// Returns the signals drained this tick.
    pub fn poll_once(&self) -> ConvergentResult<Vec<Signal>> {
        let pending = self.backend.unprocessed(&self.consumer_id)?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut drained = Vec::with_capacity(pending.len());
        let mut ack_ids = Vec::with_capacity(pending.len());
        for (ack_id, signal) in pending {
            self.dispatch(&signal);
            ack_ids.push(ack_id);
            drained.push(signal);
        }
        // Acknowledge after dispatch: a crash in between re-delivers.
        self.backend.mark_processed(&self.consumer_id, &ack_ids)?;
        Ok(drained)
    }

    /// Query stored signals with optional filters.
    pub fn signals(
        &self,
        signal_type: Option<&str>,
        source_agent: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> ConvergentResult<Vec<Signal>> {
        self.backend.signals(signal_type, source_agent, since)
    }

    /// Sweep signals older than `max_age_seconds`.
    pub fn sweep_expired(&self, max_age_seconds: u64) -> ConvergentResult<usize> {
        self.backend.sweep_expired(max_age_seconds, Utc::now())
    }

    fn dispatch(&self, signal: &Signal) {
        let subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(entries) = subscribers.get(&signal.signal_type) else {
            return;
        };
        for entry in entries {
            if let (Some(target), Some(agent)) = (&signal.target_agent, &entry.agent_id) {
                if target != agent {
                    continue;
                }
            }
            (entry.callback)(signal);
        }
    }
}

/// Map an IO error into the engine's backend error.
pub(crate) fn io_err(context: &str, e: std::io::Error) -> ConvergentError {
    warn!(context, error = %e, "signal backend io error");
    ConvergentError::backend(format!("{context}: {e}"))
}
