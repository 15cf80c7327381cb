//! SQLite persistence for phi outcomes and cached scores.
//!
//! Outcomes are append-only; the cached-score table is updated in place
//! (recomputation is idempotent). A separate database file from the
//! intent graph keeps subsystem lock contention isolated.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use convergent_core::{ConvergentError, ConvergentResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS phi_outcomes (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id     TEXT NOT NULL,
    skill_domain TEXT NOT NULL,
    outcome      TEXT NOT NULL,
    timestamp    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_phi_outcomes_agent_domain
    ON phi_outcomes(agent_id, skill_domain);

CREATE TABLE IF NOT EXISTS phi_scores (
    agent_id     TEXT NOT NULL,
    skill_domain TEXT NOT NULL,
    phi_score    REAL NOT NULL,
    last_updated TEXT NOT NULL,
    PRIMARY KEY (agent_id, skill_domain)
);
";

/// Persistence layer for agent outcomes and cached phi scores.
pub struct ScoreStore {
    conn: Mutex<Connection>,
}

impl ScoreStore {
    /// Open a score store at the given path, or in memory for `":memory:"`.
    pub fn open(path: &Path) -> ConvergentResult<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ConvergentError::backend(format!("score store schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory score store (for testing and memory-only mode).
    pub fn open_in_memory() -> ConvergentResult<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Append an outcome for `(agent_id, skill_domain)`.
    pub fn record_outcome(
        &self,
        agent_id: &str,
        skill_domain: &str,
        outcome: &str,
        timestamp: DateTime<Utc>,
    ) -> ConvergentResult<()> {
        debug!(agent_id, skill_domain, outcome, "recording outcome");
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO phi_outcomes (agent_id, skill_domain, outcome, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![agent_id, skill_domain, outcome, timestamp.to_rfc3339()],
            )
            .map_err(|e| ConvergentError::backend(format!("record_outcome: {e}")))?;
            Ok(())
        })
    }

    /// All outcomes for `(agent_id, skill_domain)`, oldest first.
    /// Rows with unparseable timestamps are skipped and logged.
    pub fn outcomes(
        &self,
        agent_id: &str,
        skill_domain: &str,
    ) -> ConvergentResult<Vec<(String, DateTime<Utc>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT outcome, timestamp FROM phi_outcomes
                     WHERE agent_id = ?1 AND skill_domain = ?2
                     ORDER BY timestamp ASC, id ASC",
                )
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map(params![agent_id, skill_domain], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            let mut outcomes = Vec::new();
            for row in rows {
                let (outcome, ts) =
                    row.map_err(|e| ConvergentError::backend(e.to_string()))?;
                match DateTime::parse_from_rfc3339(&ts) {
                    Ok(parsed) => outcomes.push((outcome, parsed.with_timezone(&Utc))),
                    Err(e) => {
                        tracing::warn!(timestamp = %ts, error = %e, "skipping corrupt outcome row");
                    }
                }
            }
            Ok(outcomes)
        })
    }

    /// Save (upsert) a computed phi score.
    pub fn save_score(
        &self,
        agent_id: &str,
        skill_domain: &str,
        phi_score: f64,
    ) -> ConvergentResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO phi_scores (agent_id, skill_domain, phi_score, last_updated)
                 VALUES (?1, ?2, ?3, ?4)",
                params![agent_id, skill_domain, phi_score, Utc::now().to_rfc3339()],
            )
            .map_err(|e| ConvergentError::backend(format!("save_score: {e}")))?;
            Ok(())
        })
    }

    /// The cached phi score, if one exists.
    pub fn score(&self, agent_id: &str, skill_domain: &str) -> ConvergentResult<Option<f64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT phi_score FROM phi_scores WHERE agent_id = ?1 AND skill_domain = ?2",
                params![agent_id, skill_domain],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(ConvergentError::backend(other.to_string())),
            })
        })
    }

    /// All cached scores for an agent, keyed by skill domain.
    pub fn all_scores(&self, agent_id: &str) -> ConvergentResult<Vec<(String, f64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT skill_domain, phi_score FROM phi_scores
                     WHERE agent_id = ?1 ORDER BY skill_domain ASC",
                )
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map(params![agent_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConvergentError::backend(e.to_string()))
        })
    }

    /// Count of recorded outcomes, across all agents.
    pub fn outcome_count(&self) -> ConvergentResult<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM phi_outcomes", [], |row| row.get(0))
                .map_err(|e| ConvergentError::backend(e.to_string()))
        })
    }

    /// Distinct agents with at least one cached score.
    pub fn scored_agents(&self) -> ConvergentResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT agent_id FROM phi_scores ORDER BY agent_id ASC")
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConvergentError::backend(e.to_string()))
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> ConvergentResult<T>,
    ) -> ConvergentResult<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| ConvergentError::backend(format!("score store lock poisoned: {e}")))?;
        f(&guard)
    }
}

/// Open a connection with the standard pragma block: WAL journal, NORMAL
/// sync, busy timeout, foreign keys.
pub(crate) fn open_connection(path: &Path) -> ConvergentResult<Connection> {
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
    Ok(conn)
}
