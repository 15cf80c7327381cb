//! SQLite intent backend — the shared persistent store.
//!
//! WAL journal mode for multi-reader concurrency; writes take a short-held
//! exclusive lock. The `intent_interfaces` table is a denormalized index
//! over every interface spec so overlap candidate lookup never deserializes
//! the full log. Snapshots and branch refs live in the same file.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use tracing::{debug, instrument, warn};

use convergent_core::protocol::{Evidence, Intent, InterfaceSpec};
use convergent_core::{matching, ConvergentError, ConvergentResult};

use crate::backend::IntentBackend;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS intents (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    intent_id    TEXT NOT NULL UNIQUE,
    agent_id     TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    body         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_intents_agent ON intents(agent_id);

CREATE TABLE IF NOT EXISTS intent_interfaces (
    intent_id       TEXT NOT NULL,
    agent_id        TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    kind            TEXT NOT NULL,
    role            TEXT NOT NULL,
    tags            TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_interfaces_name ON intent_interfaces(normalized_name);
CREATE INDEX IF NOT EXISTS idx_interfaces_agent ON intent_interfaces(agent_id);

CREATE TABLE IF NOT EXISTS intent_evidence (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    intent_id TEXT NOT NULL,
    kind      TEXT NOT NULL,
    weight    REAL NOT NULL,
    timestamp TEXT NOT NULL,
    source    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_evidence_intent ON intent_evidence(intent_id);

CREATE TABLE IF NOT EXISTS snapshots (
    snapshot_id TEXT PRIMARY KEY,
    parent_ids  TEXT NOT NULL,
    intent_ids  TEXT NOT NULL,
    branch      TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    name        TEXT PRIMARY KEY,
    snapshot_id TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
";

/// Storage-level record of a sealed snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub snapshot_id: String,
    pub parent_ids: Vec<String>,
    pub intent_ids: Vec<String>,
    pub branch: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// SQLite implementation of [`IntentBackend`].
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the intent database at `path`. `":memory:"` opens
    /// a private in-memory database.
    pub fn open(path: &Path) -> ConvergentResult<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ConvergentError::backend(format!("intent schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> ConvergentResult<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Persist a sealed snapshot. Snapshots are immutable; re-saving the
    /// same id is a no-op.
    pub fn save_snapshot(&self, record: &SnapshotRecord) -> ConvergentResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO snapshots
                     (snapshot_id, parent_ids, intent_ids, branch, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.snapshot_id,
                    serde_json::to_string(&record.parent_ids)
                        .map_err(|e| ConvergentError::backend(e.to_string()))?,
                    serde_json::to_string(&record.intent_ids)
                        .map_err(|e| ConvergentError::backend(e.to_string()))?,
                    record.branch,
                    record.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| ConvergentError::backend(format!("save_snapshot: {e}")))?;
            Ok(())
        })
    }

    /// All persisted snapshots, oldest first.
    pub fn snapshots(&self) -> ConvergentResult<Vec<SnapshotRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT snapshot_id, parent_ids, intent_ids, branch, created_at
                     FROM snapshots ORDER BY created_at ASC, snapshot_id ASC",
                )
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            let mut records = Vec::new();
            for row in rows {
                let (id, parents, intents, branch, created) =
                    row.map_err(|e| ConvergentError::backend(e.to_string()))?;
                let parsed = (
                    serde_json::from_str::<Vec<String>>(&parents),
                    serde_json::from_str::<Vec<String>>(&intents),
                    chrono::DateTime::parse_from_rfc3339(&created),
                );
                match parsed {
                    (Ok(parent_ids), Ok(intent_ids), Ok(created_at)) => {
                        records.push(SnapshotRecord {
                            snapshot_id: id,
                            parent_ids,
                            intent_ids,
                            branch,
                            created_at: created_at.with_timezone(&chrono::Utc),
                        });
                    }
                    _ => warn!(snapshot_id = %id, "skipping corrupt snapshot row"),
                }
            }
            Ok(records)
        })
    }

    /// Point a branch ref at a snapshot.
    pub fn set_branch(&self, name: &str, snapshot_id: &str) -> ConvergentResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO branches (name, snapshot_id, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![name, snapshot_id, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(|e| ConvergentError::backend(format!("set_branch: {e}")))?;
            Ok(())
        })
    }

    /// All branch refs as `(name, snapshot_id)`.
    pub fn branches(&self) -> ConvergentResult<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name, snapshot_id FROM branches ORDER BY name ASC")
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
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
            .map_err(|e| ConvergentError::backend(format!("intent db lock poisoned: {e}")))?;
        f(&guard)
    }

    fn load_intent(conn: &Connection, intent_id: &str, body: &str) -> Option<Intent> {
        let mut intent: Intent = match serde_json::from_str(body) {
            Ok(intent) => intent,
            Err(e) => {
                warn!(intent_id, error = %e, "skipping corrupt intent row");
                return None;
            }
        };
        intent.evidence = load_evidence(conn, intent_id);
        Some(intent)
    }
}

fn load_evidence(conn: &Connection, intent_id: &str) -> Vec<Evidence> {
    let mut stmt = match conn.prepare(
        "SELECT kind, weight, timestamp, source FROM intent_evidence
         WHERE intent_id = ?1 ORDER BY id ASC",
    ) {
        Ok(stmt) => stmt,
        Err(e) => {
            warn!(intent_id, error = %e, "evidence query failed");
            return Vec::new();
        }
    };

    let rows = stmt.query_map(params![intent_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    });
    let rows = match rows {
        Ok(rows) => rows,
        Err(e) => {
            warn!(intent_id, error = %e, "evidence query failed");
            return Vec::new();
        }
    };

    let mut evidence = Vec::new();
    for row in rows.flatten() {
        let (kind_str, weight, ts, source) = row;
        let kind = serde_json::from_str(&format!("\"{kind_str}\""));
        let timestamp = chrono::DateTime::parse_from_rfc3339(&ts);
        match (kind, timestamp) {
            (Ok(kind), Ok(timestamp)) => evidence.push(Evidence {
                kind,
                weight,
                timestamp: timestamp.with_timezone(&chrono::Utc),
                source,
            }),
            _ => warn!(intent_id, "skipping corrupt evidence row"),
        }
    }
    evidence
}

fn insert_evidence(conn: &Connection, intent_id: &str, evidence: &Evidence) -> ConvergentResult<()> {
    let kind = serde_json::to_string(&evidence.kind)
        .map_err(|e| ConvergentError::backend(e.to_string()))?;
    conn.execute(
        "INSERT INTO intent_evidence (intent_id, kind, weight, timestamp, source)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            intent_id,
            kind.trim_matches('"'),
            evidence.weight,
            evidence.timestamp.to_rfc3339(),
            evidence.source,
        ],
    )
    .map_err(|e| ConvergentError::backend(format!("insert evidence: {e}")))?;
    Ok(())
}

impl IntentBackend for SqliteBackend {
    #[instrument(skip(self, intent), fields(intent_id = %intent.intent_id))]
    fn publish(&self, intent: &Intent) -> ConvergentResult<u64> {
        intent.validate()?;
        self.with_conn(|conn| {
            // Idempotency check before touching the store.
            let existing: Option<(u64, String)> = conn
                .query_row(
                    "SELECT seq, content_hash FROM intents WHERE intent_id = ?1",
                    params![intent.intent_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(ConvergentError::backend(other.to_string())),
                })?;

            if let Some((seq, stored_hash)) = existing {
                if stored_hash == intent.content_hash() {
                    debug!("re-publish is a no-op");
                    return Ok(seq);
                }
                return Err(ConvergentError::DuplicateIntent {
                    intent_id: intent.intent_id.clone(),
                });
            }

            if let Some(parent) = &intent.parent_id {
                let parent_exists: bool = conn
                    .query_row(
                        "SELECT 1 FROM intents WHERE intent_id = ?1",
                        params![parent],
                        |_| Ok(true),
                    )
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(false),
                        other => Err(ConvergentError::backend(other.to_string())),
                    })?;
                if !parent_exists {
                    return Err(ConvergentError::validation(format!(
                        "parent intent '{parent}' does not exist"
                    )));
                }
            }

            let tx = conn
                .unchecked_transaction()
                .map_err(|e| ConvergentError::backend(format!("publish begin: {e}")))?;

            // The body omits evidence; evidence lives in its own table.
            let mut stored = intent.clone();
            stored.evidence.clear();
            let body = serde_json::to_string(&stored)
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            tx.execute(
                "INSERT INTO intents (intent_id, agent_id, created_at, content_hash, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    intent.intent_id,
                    intent.agent_id,
                    intent.created_at.to_rfc3339(),
                    intent.content_hash(),
                    body,
                ],
            )
            .map_err(|e| ConvergentError::backend(format!("insert intent: {e}")))?;

            for spec in intent.all_interfaces() {
                let kind = serde_json::to_string(&spec.kind)
                    .map_err(|e| ConvergentError::backend(e.to_string()))?;
                let role = if intent.provides.iter().any(|s| std::ptr::eq(s, spec)) {
                    "provides"
                } else if intent.requires.iter().any(|s| std::ptr::eq(s, spec)) {
                    "requires"
                } else {
                    "declares"
                };
                tx.execute(
                    "INSERT INTO intent_interfaces
                         (intent_id, agent_id, normalized_name, kind, role, tags)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        intent.intent_id,
                        intent.agent_id,
                        matching::normalize_name(&spec.name),
                        kind.trim_matches('"'),
                        role,
                        serde_json::to_string(&spec.tags)
                            .map_err(|e| ConvergentError::backend(e.to_string()))?,
                    ],
                )
                .map_err(|e| ConvergentError::backend(format!("insert interface: {e}")))?;
            }

            for evidence in &intent.evidence {
                insert_evidence(&tx, &intent.intent_id, evidence)?;
            }

            tx.commit()
                .map_err(|e| ConvergentError::backend(format!("publish commit: {e}")))?;

            let seq: u64 = conn
                .query_row(
                    "SELECT seq FROM intents WHERE intent_id = ?1",
                    params![intent.intent_id],
                    |row| row.get(0),
                )
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            debug!(seq, "intent published");
            Ok(seq)
        })
    }

    fn add_evidence(&self, intent_id: &str, evidence: &Evidence) -> ConvergentResult<()> {
        if evidence.weight < 0.0 {
            return Err(ConvergentError::validation("evidence weight must be >= 0"));
        }
        self.with_conn(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM intents WHERE intent_id = ?1",
                    params![intent_id],
                    |_| Ok(true),
                )
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(false),
                    other => Err(ConvergentError::backend(other.to_string())),
                })?;
            if !exists {
                return Err(ConvergentError::validation(format!(
                    "unknown intent '{intent_id}'"
                )));
            }
            insert_evidence(conn, intent_id, evidence)
        })
    }

    fn get(&self, intent_id: &str) -> ConvergentResult<Option<Intent>> {
        self.with_conn(|conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM intents WHERE intent_id = ?1",
                    params![intent_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(ConvergentError::backend(other.to_string())),
                })?;
            Ok(body.and_then(|body| Self::load_intent(conn, intent_id, &body)))
        })
    }

    fn sequence_of(&self, intent_id: &str) -> ConvergentResult<Option<u64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT seq FROM intents WHERE intent_id = ?1",
                params![intent_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(ConvergentError::backend(other.to_string())),
            })
        })
    }

    fn list_by_agent(&self, agent_id: &str) -> ConvergentResult<Vec<Intent>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT intent_id, body FROM intents
                     WHERE agent_id = ?1 ORDER BY seq ASC",
                )
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            collect_intents(conn, &mut stmt, params![agent_id])
        })
    }

    fn all(&self) -> ConvergentResult<Vec<Intent>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT intent_id, body FROM intents ORDER BY seq ASC")
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            collect_intents(conn, &mut stmt, [])
        })
    }

    fn candidates(
        &self,
        specs: &[InterfaceSpec],
        exclude_agent: &str,
    ) -> ConvergentResult<Vec<Intent>> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            // Phase 1: candidate ids from the denormalized index.
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT intent_id, normalized_name, tags
                     FROM intent_interfaces WHERE agent_id != ?1",
                )
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map(params![exclude_agent], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            let mut candidate_ids: Vec<String> = Vec::new();
            for row in rows {
                let (intent_id, name, tags_json) =
                    row.map_err(|e| ConvergentError::backend(e.to_string()))?;
                if candidate_ids.contains(&intent_id) {
                    continue;
                }
                let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
                let hit = specs.iter().any(|mine| {
                    matching::names_overlap(&matching::normalize_name(&mine.name), &name)
                        || matching::tag_jaccard(&mine.tags, &tags) > 0.0
                });
                if hit {
                    candidate_ids.push(intent_id);
                }
            }

            // Phase 2: load the candidates in publish order.
            let mut intents = Vec::new();
            for intent_id in candidate_ids {
                let body: Option<String> = conn
                    .query_row(
                        "SELECT body FROM intents WHERE intent_id = ?1",
                        params![intent_id],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(ConvergentError::backend(other.to_string())),
                    })?;
                if let Some(intent) =
                    body.and_then(|body| Self::load_intent(conn, &intent_id, &body))
                {
                    intents.push(intent);
                }
            }
            Ok(intents)
        })
    }

    fn count(&self) -> ConvergentResult<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM intents", [], |row| row.get(0))
                .map_err(|e| ConvergentError::backend(e.to_string()))
        })
    }
}

fn collect_intents<P: rusqlite::Params>(
    conn: &Connection,
    stmt: &mut rusqlite::Statement<'_>,
    args: P,
) -> ConvergentResult<Vec<Intent>> {
    let rows = stmt
        .query_map(args, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| ConvergentError::backend(e.to_string()))?;

    let mut intents = Vec::new();
    for row in rows {
        let (intent_id, body) = row.map_err(|e| ConvergentError::backend(e.to_string()))?;
        if let Some(intent) = SqliteBackend::load_intent(conn, &intent_id, &body) {
            intents.push(intent);
        }
    }
    Ok(intents)
}

/// Open a connection with the standard pragma block.
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
