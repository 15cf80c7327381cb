//! Coordination event log — an append-only audit trail across all
//! subsystems, tagged with correlation ids so related events can be
//! traced together. Iteration is cursor-based and restartable.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::warn;

use convergent_core::{ConvergentError, ConvergentResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS coordination_events (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id       TEXT NOT NULL UNIQUE,
    event_type     TEXT NOT NULL,
    agent_id       TEXT NOT NULL,
    timestamp      TEXT NOT NULL,
    payload        TEXT NOT NULL,
    correlation_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_type ON coordination_events(event_type);
CREATE INDEX IF NOT EXISTS idx_events_agent ON coordination_events(agent_id);
CREATE INDEX IF NOT EXISTS idx_events_corr ON coordination_events(correlation_id);
";

/// Types of coordination events captured in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    IntentPublished,
    IntentResolved,
    ConflictDetected,
    VoteCast,
    DecisionMade,
    MarkerLeft,
    MarkerEvaporated,
    SignalSent,
    ScoreUpdated,
    EscalationTriggered,
}

impl EventType {
    fn as_str(self) -> &'static str {
        match self {
            EventType::IntentPublished => "intent_published",
            EventType::IntentResolved => "intent_resolved",
            EventType::ConflictDetected => "conflict_detected",
            EventType::VoteCast => "vote_cast",
            EventType::DecisionMade => "decision_made",
            EventType::MarkerLeft => "marker_left",
            EventType::MarkerEvaporated => "marker_evaporated",
            EventType::SignalSent => "signal_sent",
            EventType::ScoreUpdated => "score_updated",
            EventType::EscalationTriggered => "escalation_triggered",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "intent_published" => Some(EventType::IntentPublished),
            "intent_resolved" => Some(EventType::IntentResolved),
            "conflict_detected" => Some(EventType::ConflictDetected),
            "vote_cast" => Some(EventType::VoteCast),
            "decision_made" => Some(EventType::DecisionMade),
            "marker_left" => Some(EventType::MarkerLeft),
            "marker_evaporated" => Some(EventType::MarkerEvaporated),
            "signal_sent" => Some(EventType::SignalSent),
            "score_updated" => Some(EventType::ScoreUpdated),
            "escalation_triggered" => Some(EventType::EscalationTriggered),
            _ => None,
        }
    }
}

/// A single event in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinationEvent {
    /// Store-assigned sequence; the cursor position.
    pub seq: u64,
    pub event_id: String,
    pub event_type: EventType,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
}

/// Append-only event log in the coordination database.
pub struct EventLog {
    conn: Mutex<Connection>,
}

impl EventLog {
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
            .map_err(|e| ConvergentError::backend(format!("event schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> ConvergentResult<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Append an event.
    pub fn record(
        &self,
        event_type: EventType,
        agent_id: &str,
        payload: serde_json::Value,
        correlation_id: Option<&str>,
    ) -> ConvergentResult<CoordinationEvent> {
        let event = CoordinationEvent {
            seq: 0,
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
            payload,
            correlation_id: correlation_id.map(String::from),
        };
        let seq = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO coordination_events
                     (event_id, event_type, agent_id, timestamp, payload, correlation_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.event_id,
                    event.event_type.as_str(),
                    event.agent_id,
                    event.timestamp.to_rfc3339(),
                    event.payload.to_string(),
                    event.correlation_id,
                ],
            )
            .map_err(|e| ConvergentError::backend(format!("record event: {e}")))?;
            Ok(conn.last_insert_rowid() as u64)
        })?;
        Ok(CoordinationEvent { seq, ..event })
    }

    /// Events after a cursor position, with optional filters, oldest
    /// first, at most `limit`.
    pub fn query(
        &self,
        event_type: Option<EventType>,
        agent_id: Option<&str>,
        correlation_id: Option<&str>,
        after_seq: u64,
        limit: u64,
    ) -> ConvergentResult<Vec<CoordinationEvent>> {
        self.with_conn(|conn| {
            let mut clauses = vec!["seq > ?".to_string()];
            let mut args: Vec<String> = vec![after_seq.to_string()];
            if let Some(event_type) = event_type {
                clauses.push("event_type = ?".to_string());
                args.push(event_type.as_str().to_string());
            }
            if let Some(agent_id) = agent_id {
                clauses.push("agent_id = ?".to_string());
                args.push(agent_id.to_string());
            }
            if let Some(correlation_id) = correlation_id {
                clauses.push("correlation_id = ?".to_string());
                args.push(correlation_id.to_string());
            }

            let sql = format!(
                "SELECT seq, event_id, event_type, agent_id, timestamp, payload, correlation_id
                 FROM coordination_events WHERE {} ORDER BY seq ASC LIMIT {limit}",
                clauses.join(" AND ")
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), row_to_event)
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            let mut events = Vec::new();
            for row in rows {
                if let Some(event) = row.map_err(|e| ConvergentError::backend(e.to_string()))? {
                    events.push(event);
                }
            }
            Ok(events)
        })
    }

    pub fn count(&self, event_type: Option<EventType>) -> ConvergentResult<u64> {
        self.with_conn(|conn| match event_type {
            Some(event_type) => conn
                .query_row(
                    "SELECT COUNT(*) FROM coordination_events WHERE event_type = ?1",
                    params![event_type.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| ConvergentError::backend(e.to_string())),
            None => conn
                .query_row("SELECT COUNT(*) FROM coordination_events", [], |row| row.get(0))
                .map_err(|e| ConvergentError::backend(e.to_string())),
        })
    }

    /// A restartable cursor over the log, paging from `after_seq`.
    pub fn cursor(&self, after_seq: u64) -> EventCursor<'_> {
        EventCursor {
            log: self,
            position: after_seq,
            page_size: 100,
            buffer: Vec::new(),
            done: false,
        }
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> ConvergentResult<T>,
    ) -> ConvergentResult<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| ConvergentError::backend(format!("event log lock poisoned: {e}")))?;
        f(&guard)
    }
}

/// A finite, restartable lazy sequence over the event log. Remembers its
/// position, so a new cursor can resume where a previous one stopped.
pub struct EventCursor<'a> {
    log: &'a EventLog,
    position: u64,
    page_size: u64,
    buffer: Vec<CoordinationEvent>,
    done: bool,
}

impl EventCursor<'_> {
    /// The sequence number the cursor has consumed up to.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Iterator for EventCursor<'_> {
    type Item = CoordinationEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            match self
                .log
                .query(None, None, None, self.position, self.page_size)
            {
                Ok(page) => {
                    if page.len() < self.page_size as usize {
                        self.done = true;
                    }
                    self.buffer = page;
                    self.buffer.reverse();
                }
                Err(e) => {
                    warn!(error = %e, "event cursor query failed");
                    self.done = true;
                }
            }
        }
        let event = self.buffer.pop()?;
        self.position = event.seq;
        Some(event)
    }
}

/// Render events as a human-readable timeline.
pub fn event_timeline(events: &[CoordinationEvent]) -> String {
    if events.is_empty() {
        return "(no events)".to_string();
    }
    let mut lines = vec!["=== Coordination event timeline ===".to_string(), String::new()];
    for event in events {
        let correlation = event
            .correlation_id
            .as_deref()
            .map(|c| format!(" [{c}]"))
            .unwrap_or_default();
        let payload = if event.payload.is_null() {
            String::new()
        } else {
            format!(" {}", event.payload)
        };
        lines.push(format!(
            "  {} | {:<22} | {}{}{}",
            event.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            event.event_type.as_str(),
            event.agent_id,
            correlation,
            payload
        ));
    }
    lines.push(String::new());
    lines.push(format!("Total: {} events", events.len()));
    lines.join("\n")
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<CoordinationEvent>> {
    let type_raw: String = row.get("event_type")?;
    let ts_raw: String = row.get("timestamp")?;
    let event_id: String = row.get("event_id")?;

    let (Some(event_type), Ok(timestamp)) =
        (EventType::parse(&type_raw), DateTime::parse_from_rfc3339(&ts_raw))
    else {
        warn!(event_id, "skipping corrupt event row");
        return Ok(None);
    };
    let payload_raw: String = row.get("payload")?;

    Ok(Some(CoordinationEvent {
        seq: row.get::<_, i64>("seq")? as u64,
        event_id,
        event_type,
        agent_id: row.get("agent_id")?,
        timestamp: timestamp.with_timezone(&Utc),
        payload: serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null),
        correlation_id: row.get("correlation_id")?,
    }))
}
