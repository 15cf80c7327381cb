//! SQLite signal backend — cross-process, durable, with per-consumer
//! cursor tracking in a companion table.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::warn;

use convergent_core::protocol::Signal;
use convergent_core::{ConvergentError, ConvergentResult};

use super::SignalBackend;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS signals (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_type  TEXT NOT NULL,
    source_agent TEXT NOT NULL,
    target_agent TEXT,
    payload      TEXT NOT NULL DEFAULT '',
    timestamp    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_signals_type ON signals(signal_type);
CREATE INDEX IF NOT EXISTS idx_signals_timestamp ON signals(timestamp);

CREATE TABLE IF NOT EXISTS signal_consumers (
    consumer_id  TEXT NOT NULL,
    signal_id    INTEGER NOT NULL,
    processed_at TEXT NOT NULL,
    PRIMARY KEY (consumer_id, signal_id)
);
";

/// SQLite implementation of [`SignalBackend`].
pub struct SqliteSignalBackend {
    conn: Mutex<Connection>,
}

impl SqliteSignalBackend {
    pub fn open(path: &Path) -> ConvergentResult<Self> {
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| ConvergentError::backend(format!("open {}: {e}", path.display())))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            ",
        )
        .map_err(|e| ConvergentError::backend(format!("pragmas: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ConvergentError::backend(format!("signal schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> ConvergentResult<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> ConvergentResult<T>,
    ) -> ConvergentResult<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| ConvergentError::backend(format!("signal db lock poisoned: {e}")))?;
        f(&guard)
    }
}

fn row_to_signal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<Signal>> {
    let ts_raw: String = row.get("timestamp")?;
    let Ok(timestamp) = DateTime::parse_from_rfc3339(&ts_raw) else {
        warn!(timestamp = %ts_raw, "skipping corrupt signal row");
        return Ok(None);
    };
    Ok(Some(Signal {
        signal_type: row.get("signal_type")?,
        source_agent: row.get("source_agent")?,
        target_agent: row.get("target_agent")?,
        payload: row.get("payload")?,
        timestamp: timestamp.with_timezone(&Utc),
    }))
}

impl SignalBackend for SqliteSignalBackend {
    fn store(&self, signal: &Signal) -> ConvergentResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO signals (signal_type, source_agent, target_agent, payload, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    signal.signal_type,
                    signal.source_agent,
                    signal.target_agent,
                    signal.payload,
                    signal.timestamp.to_rfc3339(),
                ],
            )
            .map_err(|e| ConvergentError::backend(format!("store signal: {e}")))?;
            Ok(())
        })
    }

    fn unprocessed(&self, consumer_id: &str) -> ConvergentResult<Vec<(String, Signal)>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT s.id, s.signal_type, s.source_agent, s.target_agent,
                            s.payload, s.timestamp
                     FROM signals s
                     LEFT JOIN signal_consumers sc
                       ON s.id = sc.signal_id AND sc.consumer_id = ?1
                     WHERE sc.signal_id IS NULL
                     ORDER BY s.timestamp ASC, s.id ASC",
                )
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map(params![consumer_id], |row| {
                    Ok((row.get::<_, i64>("id")?, row_to_signal(row)?))
                })
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            let mut pending = Vec::new();
            for row in rows {
                let (id, signal) = row.map_err(|e| ConvergentError::backend(e.to_string()))?;
                if let Some(signal) = signal {
                    pending.push((id.to_string(), signal));
                }
            }
            Ok(pending)
        })
    }

    fn mark_processed(&self, consumer_id: &str, ack_ids: &[String]) -> ConvergentResult<()> {
        self.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            for ack in ack_ids {
                let Ok(id) = ack.parse::<i64>() else {
                    continue;
                };
                conn.execute(
                    "INSERT OR IGNORE INTO signal_consumers (consumer_id, signal_id, processed_at)
                     VALUES (?1, ?2, ?3)",
                    params![consumer_id, id, now],
                )
                .map_err(|e| ConvergentError::backend(format!("mark_processed: {e}")))?;
            }
            Ok(())
        })
    }

    fn signals(
        &self,
        signal_type: Option<&str>,
        source_agent: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> ConvergentResult<Vec<Signal>> {
        self.with_conn(|conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<String> = Vec::new();
            if let Some(signal_type) = signal_type {
                clauses.push("signal_type = ?");
                args.push(signal_type.to_string());
            }
            if let Some(source_agent) = source_agent {
                clauses.push("source_agent = ?");
                args.push(source_agent.to_string());
            }
            if let Some(since) = since {
                clauses.push("timestamp > ?");
                args.push(since.to_rfc3339());
            }
            let where_clause = if clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", clauses.join(" AND "))
            };

            let sql = format!(
                "SELECT signal_type, source_agent, target_agent, payload, timestamp
                 FROM signals {where_clause} ORDER BY timestamp ASC, id ASC"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), row_to_signal)
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            let mut matched = Vec::new();
            for row in rows {
                if let Some(signal) = row.map_err(|e| ConvergentError::backend(e.to_string()))? {
                    matched.push(signal);
                }
            }
            Ok(matched)
        })
    }

    fn sweep_expired(&self, max_age_seconds: u64, now: DateTime<Utc>) -> ConvergentResult<usize> {
        self.with_conn(|conn| {
            let cutoff = (now - chrono::Duration::seconds(max_age_seconds as i64)).to_rfc3339();
            conn.execute(
                "DELETE FROM signal_consumers WHERE signal_id IN
                     (SELECT id FROM signals WHERE timestamp <= ?1)",
                params![cutoff],
            )
            .map_err(|e| ConvergentError::backend(format!("sweep consumers: {e}")))?;
            let removed = conn
                .execute("DELETE FROM signals WHERE timestamp <= ?1", params![cutoff])
                .map_err(|e| ConvergentError::backend(format!("sweep signals: {e}")))?;
            Ok(removed)
        })
    }
}
