//! In-memory signal backend — per-process, not durable.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use convergent_core::protocol::Signal;
use convergent_core::{ConvergentError, ConvergentResult};

use super::SignalBackend;

#[derive(Default)]
struct Inner {
    next_id: u64,
    signals: Vec<(u64, Signal)>,
    processed: HashMap<String, HashSet<u64>>,
}

/// In-memory implementation of [`SignalBackend`].
#[derive(Default)]
pub struct MemorySignalBackend {
    inner: Mutex<Inner>,
}

impl MemorySignalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ConvergentResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| ConvergentError::backend(format!("signal lock poisoned: {e}")))
    }
}

impl SignalBackend for MemorySignalBackend {
    fn store(&self, signal: &Signal) -> ConvergentResult<()> {
        let mut inner = self.lock()?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.signals.push((id, signal.clone()));
        Ok(())
    }

    fn unprocessed(&self, consumer_id: &str) -> ConvergentResult<Vec<(String, Signal)>> {
        let inner = self.lock()?;
        let seen = inner.processed.get(consumer_id);
        let mut pending: Vec<(String, Signal)> = inner
            .signals
            .iter()
            .filter(|(id, _)| seen.is_none_or(|s| !s.contains(id)))
            .map(|(id, signal)| (id.to_string(), signal.clone()))
            .collect();
        pending.sort_by(|a, b| {
            a.1.timestamp
                .cmp(&b.1.timestamp)
                .then_with(|| a.0.len().cmp(&b.0.len()))
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(pending)
    }

    fn mark_processed(&self, consumer_id: &str, ack_ids: &[String]) -> ConvergentResult<()> {
        let mut inner = self.lock()?;
        let seen = inner.processed.entry(consumer_id.to_string()).or_default();
        for ack in ack_ids {
            if let Ok(id) = ack.parse::<u64>() {
                seen.insert(id);
            }
        }
        Ok(())
    }

    fn signals(
        &self,
        signal_type: Option<&str>,
        source_agent: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> ConvergentResult<Vec<Signal>> {
        let inner = self.lock()?;
        let mut matched: Vec<Signal> = inner
            .signals
            .iter()
            .map(|(_, signal)| signal)
            .filter(|s| signal_type.is_none_or(|t| s.signal_type == t))
            .filter(|s| source_agent.is_none_or(|a| s.source_agent == a))
            .filter(|s| since.is_none_or(|cutoff| s.timestamp > cutoff))
            .cloned()
            .collect();
        matched.sort_by_key(|s| s.timestamp);
        Ok(matched)
    }

    fn sweep_expired(&self, max_age_seconds: u64, now: DateTime<Utc>) -> ConvergentResult<usize> {
        let mut inner = self.lock()?;
        let cutoff = now - chrono::Duration::seconds(max_age_seconds as i64);
        let before = inner.signals.len();
        inner.signals.retain(|(_, s)| s.timestamp > cutoff);
        Ok(before - inner.signals.len())
    }
}
