//! SQLite persistence for consensus requests, votes, and decisions.
//!
//! Lives in the coordination database alongside the phi score tables.
//! Requests and votes are append-only; decisions are written once per
//! request (the unique final decision) with the full vote set for audit.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::warn;

use convergent_core::protocol::{ConsensusRequest, Decision, Vote};
use convergent_core::{ConvergentError, ConvergentResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS consensus_requests (
    request_id   TEXT PRIMARY KEY,
    task_id      TEXT NOT NULL,
    requested_at TEXT NOT NULL,
    body         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_requests_task ON consensus_requests(task_id);

CREATE TABLE IF NOT EXISTS consensus_votes (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL,
    agent_id   TEXT NOT NULL,
    choice     TEXT NOT NULL,
    confidence REAL NOT NULL,
    timestamp  TEXT NOT NULL,
    body       TEXT NOT NULL,
    UNIQUE (request_id, agent_id)
);
CREATE INDEX IF NOT EXISTS idx_votes_agent ON consensus_votes(agent_id);

CREATE TABLE IF NOT EXISTS consensus_decisions (
    request_id TEXT PRIMARY KEY,
    task_id    TEXT NOT NULL,
    outcome    TEXT NOT NULL,
    decided_at TEXT NOT NULL,
    body       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_decisions_task ON consensus_decisions(task_id);

CREATE TABLE IF NOT EXISTS human_confirmations (
    request_id   TEXT PRIMARY KEY,
    confirmed_by TEXT NOT NULL,
    confirmed_at TEXT NOT NULL
);
";

/// Per-agent voting statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoteStats {
    pub total: u64,
    pub approve: u64,
    pub reject: u64,
    pub abstain: u64,
    pub escalate: u64,
    pub avg_confidence: f64,
}

/// Persistence layer for the voting engine.
pub struct DecisionStore {
    conn: Mutex<Connection>,
}

impl DecisionStore {
    pub fn open(path: &Path) -> ConvergentResult<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ConvergentError::backend(format!("decision store schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> ConvergentResult<Self> {
        Self::open(Path::new(":memory:"))
    }

    pub fn save_request(&self, request: &ConsensusRequest) -> ConvergentResult<()> {
        let body = serde_json::to_string(request)
            .map_err(|e| ConvergentError::backend(e.to_string()))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO consensus_requests
                     (request_id, task_id, requested_at, body)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    request.request_id,
                    request.task_id,
                    request.requested_at.to_rfc3339(),
                    body
                ],
            )
            .map_err(|e| ConvergentError::backend(format!("save_request: {e}")))?;
            Ok(())
        })
    }

    pub fn request(&self, request_id: &str) -> ConvergentResult<Option<ConsensusRequest>> {
        self.with_conn(|conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM consensus_requests WHERE request_id = ?1",
                    params![request_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(no_rows_to_none)?;
            Ok(body.and_then(|body| parse_or_warn(&body, "consensus request")))
        })
    }

    /// Persist a vote. One vote per agent per request; a second vote from
    /// the same agent is a validation error.
    pub fn save_vote(&self, vote: &Vote) -> ConvergentResult<()> {
        let body =
            serde_json::to_string(vote).map_err(|e| ConvergentError::backend(e.to_string()))?;
        let choice = serde_json::to_string(&vote.choice)
            .map_err(|e| ConvergentError::backend(e.to_string()))?;
        self.with_conn(|conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO consensus_votes
                         (request_id, agent_id, choice, confidence, timestamp, body)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        vote.request_id,
                        vote.agent.agent_id,
                        choice.trim_matches('"'),
                        vote.confidence,
                        vote.timestamp.to_rfc3339(),
                        body
                    ],
                )
                .map_err(|e| ConvergentError::backend(format!("save_vote: {e}")))?;
            if inserted == 0 {
                return Err(ConvergentError::validation(format!(
                    "agent '{}' already voted on request '{}'",
                    vote.agent.agent_id, vote.request_id
                )));
            }
            Ok(())
        })
    }

    /// Votes for a request, in arrival order, optionally only those
    /// persisted at or before `cutoff`.
    pub fn votes(
        &self,
        request_id: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> ConvergentResult<Vec<Vote>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT body, timestamp FROM consensus_votes
                     WHERE request_id = ?1 ORDER BY id ASC",
                )
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map(params![request_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            let mut votes = Vec::new();
            for row in rows {
                let (body, ts) = row.map_err(|e| ConvergentError::backend(e.to_string()))?;
                let Some(vote) = parse_or_warn::<Vote>(&body, "vote") else {
                    continue;
                };
                if let Some(cutoff) = cutoff {
                    let persisted = DateTime::parse_from_rfc3339(&ts)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or(vote.timestamp);
                    if persisted > cutoff {
                        continue;
                    }
                }
                votes.push(vote);
            }
            Ok(votes)
        })
    }

    /// Write the unique final decision for a request. A second write for
    /// the same request is ignored — the first decision stands.
    pub fn save_decision(&self, decision: &Decision) -> ConvergentResult<()> {
        let body = serde_json::to_string(decision)
            .map_err(|e| ConvergentError::backend(e.to_string()))?;
        let outcome = serde_json::to_string(&decision.outcome)
            .map_err(|e| ConvergentError::backend(e.to_string()))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO consensus_decisions
                     (request_id, task_id, outcome, decided_at, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    decision.request.request_id,
                    decision.request.task_id,
                    outcome.trim_matches('"'),
                    decision.decided_at.to_rfc3339(),
                    body
                ],
            )
            .map_err(|e| ConvergentError::backend(format!("save_decision: {e}")))?;
            Ok(())
        })
    }

    pub fn decision(&self, request_id: &str) -> ConvergentResult<Option<Decision>> {
        self.with_conn(|conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM consensus_decisions WHERE request_id = ?1",
                    params![request_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(no_rows_to_none)?;
            Ok(body.and_then(|body| parse_or_warn(&body, "decision")))
        })
    }

    /// Decision history, optionally filtered by task and outcome,
    /// newest first.
    pub fn decision_history(
        &self,
        task_id: Option<&str>,
        outcome: Option<&str>,
        limit: u64,
    ) -> ConvergentResult<Vec<Decision>> {
        self.with_conn(|conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<String> = Vec::new();
            if let Some(task_id) = task_id {
                clauses.push("task_id = ?");
                args.push(task_id.to_string());
            }
            if let Some(outcome) = outcome {
                clauses.push("outcome = ?");
                args.push(outcome.to_string());
            }
            let where_clause = if clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", clauses.join(" AND "))
            };

            let sql = format!(
                "SELECT body FROM consensus_decisions {where_clause}
                 ORDER BY decided_at DESC LIMIT {limit}"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            let mut decisions = Vec::new();
            for row in rows {
                let body = row.map_err(|e| ConvergentError::backend(e.to_string()))?;
                if let Some(decision) = parse_or_warn(&body, "decision") {
                    decisions.push(decision);
                }
            }
            Ok(decisions)
        })
    }

    /// Aggregate voting statistics for one agent.
    pub fn agent_vote_stats(&self, agent_id: &str) -> ConvergentResult<VoteStats> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT choice, confidence FROM consensus_votes WHERE agent_id = ?1",
                )
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map(params![agent_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            let mut stats = VoteStats::default();
            let mut confidence_sum = 0.0;
            for row in rows {
                let (choice, confidence) =
                    row.map_err(|e| ConvergentError::backend(e.to_string()))?;
                stats.total += 1;
                confidence_sum += confidence;
                match choice.as_str() {
                    "approve" => stats.approve += 1,
                    "reject" => stats.reject += 1,
                    "abstain" => stats.abstain += 1,
                    "escalate" => stats.escalate += 1,
                    other => warn!(choice = other, "unknown vote choice in store"),
                }
            }
            if stats.total > 0 {
                stats.avg_confidence = confidence_sum / stats.total as f64;
            }
            Ok(stats)
        })
    }

    pub fn confirm_human(
        &self,
        request_id: &str,
        confirmed_by: &str,
        at: DateTime<Utc>,
    ) -> ConvergentResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO human_confirmations
                     (request_id, confirmed_by, confirmed_at)
                 VALUES (?1, ?2, ?3)",
                params![request_id, confirmed_by, at.to_rfc3339()],
            )
            .map_err(|e| ConvergentError::backend(format!("confirm_human: {e}")))?;
            Ok(())
        })
    }

    pub fn human_confirmed(&self, request_id: &str) -> ConvergentResult<bool> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM human_confirmations WHERE request_id = ?1",
                params![request_id],
                |_| Ok(true),
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(false),
                other => Err(ConvergentError::backend(other.to_string())),
            })
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> ConvergentResult<T>,
    ) -> ConvergentResult<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| ConvergentError::backend(format!("decision store lock poisoned: {e}")))?;
        f(&guard)
    }
}

fn parse_or_warn<T: serde::de::DeserializeOwned>(body: &str, what: &str) -> Option<T> {
    match serde_json::from_str(body) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "skipping corrupt {what} record");
            None
        }
    }
}

fn no_rows_to_none<T>(e: rusqlite::Error) -> ConvergentResult<Option<T>> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(ConvergentError::backend(other.to_string())),
    }
}

fn open_connection(path: &Path) -> ConvergentResult<Connection> {
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
