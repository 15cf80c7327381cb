//! Filesystem signal backend — one JSON file per signal.
//!
//! Writes are atomic (tmp file + rename). Filenames lead with a
//! lexicographically sortable timestamp so a directory scan yields
//! timestamp order. Per-consumer positions live in memory; a fresh
//! process re-reads the directory, which keeps delivery at-least-once.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::warn;

use convergent_core::protocol::Signal;
use convergent_core::{ConvergentError, ConvergentResult};

use super::{io_err, SignalBackend};

/// Filesystem implementation of [`SignalBackend`].
pub struct FilesystemSignalBackend {
    dir: PathBuf,
    processed: Mutex<HashMap<String, HashSet<String>>>,
}

impl FilesystemSignalBackend {
    pub fn open(dir: &std::path::Path) -> ConvergentResult<Self> {
        fs::create_dir_all(dir).map_err(|e| io_err("create signal dir", e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            processed: Mutex::new(HashMap::new()),
        })
    }

    fn filename(signal: &Signal) -> String {
        // Sortable: %Y%m%dT%H%M%S%.9f, then disambiguators.
        let ts = signal.timestamp.format("%Y%m%dT%H%M%S%.9f");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{ts}_{}_{}_{}.json",
            sanitize(&signal.signal_type),
            sanitize(&signal.source_agent),
            &suffix[..8]
        )
    }

    fn read_signal(&self, name: &str) -> Option<Signal> {
        let path = self.dir.join(name);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(file = name, error = %e, "skipping malformed signal file");
                None
            }
        }
    }

    fn sorted_files(&self) -> ConvergentResult<Vec<String>> {
        let mut names = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| io_err("scan signal dir", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err("scan signal dir", e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

impl SignalBackend for FilesystemSignalBackend {
    fn store(&self, signal: &Signal) -> ConvergentResult<()> {
        let name = Self::filename(signal);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let body = serde_json::to_string(signal)
            .map_err(|e| ConvergentError::backend(e.to_string()))?;
        fs::write(&tmp, body).map_err(|e| io_err("write signal", e))?;
        fs::rename(&tmp, self.dir.join(&name)).map_err(|e| io_err("publish signal", e))?;
        Ok(())
    }

    fn unprocessed(&self, consumer_id: &str) -> ConvergentResult<Vec<(String, Signal)>> {
        let processed = {
            let guard = self
                .processed
                .lock()
                .map_err(|e| ConvergentError::backend(format!("signal lock poisoned: {e}")))?;
            guard.get(consumer_id).cloned().unwrap_or_default()
        };

        let mut pending = Vec::new();
        for name in self.sorted_files()? {
            if processed.contains(&name) {
                continue;
            }
            if let Some(signal) = self.read_signal(&name) {
                pending.push((name, signal));
            }
        }
        Ok(pending)
    }

    fn mark_processed(&self, consumer_id: &str, ack_ids: &[String]) -> ConvergentResult<()> {
        let mut guard = self
            .processed
            .lock()
            .map_err(|e| ConvergentError::backend(format!("signal lock poisoned: {e}")))?;
        let seen = guard.entry(consumer_id.to_string()).or_default();
        seen.extend(ack_ids.iter().cloned());
        Ok(())
    }

    fn signals(
        &self,
        signal_type: Option<&str>,
        source_agent: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> ConvergentResult<Vec<Signal>> {
        let mut matched = Vec::new();
        for name in self.sorted_files()? {
            let Some(signal) = self.read_signal(&name) else {
                continue;
            };
            if signal_type.is_some_and(|t| signal.signal_type != t) {
                continue;
            }
            if source_agent.is_some_and(|a| signal.source_agent != a) {
                continue;
            }
            if since.is_some_and(|cutoff| signal.timestamp <= cutoff) {
                continue;
            }
            matched.push(signal);
        }
        Ok(matched)
    }

    fn sweep_expired(&self, max_age_seconds: u64, now: DateTime<Utc>) -> ConvergentResult<usize> {
        let cutoff = now - chrono::Duration::seconds(max_age_seconds as i64);
        let mut removed = 0;
        for name in self.sorted_files()? {
            let Some(signal) = self.read_signal(&name) else {
                continue;
            };
            if signal.timestamp <= cutoff {
                if fs::remove_file(self.dir.join(&name)).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
