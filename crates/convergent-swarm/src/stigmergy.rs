//! Stigmergy — trail markers for indirect inter-agent communication.
//!
//! Agents leave markers that influence future agents, like pheromone
//! trails. Strength decays exponentially (evaporation) so stale data
//! fades; markers strictly below the floor are purged, markers at exactly
//! the floor survive. Reinforcement adds strength, capped at 2.0.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info, instrument};

use convergent_core::protocol::{MarkerType, StigmergyMarker};
use convergent_core::{ConvergentError, ConvergentResult, CoordinationConfig};

const STRENGTH_CAP: f64 = 2.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stigmergy_markers (
    marker_id   TEXT PRIMARY KEY,
    agent_id    TEXT NOT NULL,
    marker_type TEXT NOT NULL,
    target      TEXT NOT NULL,
    content     TEXT NOT NULL,
    strength    REAL NOT NULL DEFAULT 1.0,
    created_at  TEXT NOT NULL,
    decayed_at  TEXT NOT NULL,
    expires_at  TEXT
);
CREATE INDEX IF NOT EXISTS idx_markers_target ON stigmergy_markers(target);
CREATE INDEX IF NOT EXISTS idx_markers_type ON stigmergy_markers(marker_type);
CREATE INDEX IF NOT EXISTS idx_markers_agent ON stigmergy_markers(agent_id);
";

/// Manages stigmergy markers with evaporation and reinforcement.
pub struct StigmergyField {
    conn: Mutex<Connection>,
    evaporation_rate: f64,
    min_strength: f64,
}

impl StigmergyField {
    /// Open the stigmergy store at `path` (`":memory:"` for in-memory).
    pub fn open(path: &Path, config: &CoordinationConfig) -> ConvergentResult<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ConvergentError::backend(format!("stigmergy schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            evaporation_rate: config.stigmergy_evaporation_rate,
            min_strength: config.stigmergy_min_strength,
        })
    }

    pub fn open_in_memory(config: &CoordinationConfig) -> ConvergentResult<Self> {
        Self::open(Path::new(":memory:"), config)
    }

    /// Leave a marker for future agents.
    #[instrument(skip(self, content))]
    pub fn leave_marker_at(
        &self,
        agent_id: &str,
        marker_type: MarkerType,
        target: &str,
        content: &str,
        strength: f64,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> ConvergentResult<StigmergyMarker> {
        if strength < 0.0 {
            return Err(ConvergentError::validation("marker strength must be >= 0"));
        }
        let marker = StigmergyMarker {
            marker_id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            marker_type,
            target: target.to_string(),
            content: content.to_string(),
            strength,
            created_at,
            expires_at,
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO stigmergy_markers
                     (marker_id, agent_id, marker_type, target, content, strength,
                      created_at, decayed_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    marker.marker_id,
                    marker.agent_id,
                    type_str(marker.marker_type),
                    marker.target,
                    marker.content,
                    marker.strength,
                    marker.created_at.to_rfc3339(),
                    marker.created_at.to_rfc3339(),
                    marker.expires_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| ConvergentError::backend(format!("leave_marker: {e}")))?;
            Ok(())
        })?;
        info!(strength, "marker left");
        Ok(marker)
    }

    /// Leave a marker with default strength 1.0, timestamped now.
    pub fn leave_marker(
        &self,
        agent_id: &str,
        marker_type: MarkerType,
        target: &str,
        content: &str,
    ) -> ConvergentResult<StigmergyMarker> {
        self.leave_marker_at(agent_id, marker_type, target, content, 1.0, Utc::now(), None)
    }

    /// All markers for a target, newest first.
    pub fn markers_for(&self, target: &str) -> ConvergentResult<Vec<StigmergyMarker>> {
        self.query_markers(
            "SELECT * FROM stigmergy_markers WHERE target = ?1 ORDER BY created_at DESC",
            params![target],
        )
    }

    /// All markers of a type, newest first.
    pub fn markers_by_type(&self, marker_type: MarkerType) -> ConvergentResult<Vec<StigmergyMarker>> {
        self.query_markers(
            "SELECT * FROM stigmergy_markers WHERE marker_type = ?1 ORDER BY created_at DESC",
            params![type_str(marker_type)],
        )
    }

    /// All markers left by an agent, newest first.
    pub fn markers_by_agent(&self, agent_id: &str) -> ConvergentResult<Vec<StigmergyMarker>> {
        self.query_markers(
            "SELECT * FROM stigmergy_markers WHERE agent_id = ?1 ORDER BY created_at DESC",
            params![agent_id],
        )
    }

    /// Add to a marker's strength. Zero delta is a no-op; the result is
    /// capped. Returns the new strength, or None for an unknown marker.
    pub fn reinforce(&self, marker_id: &str, delta: f64) -> ConvergentResult<Option<f64>> {
        if delta < 0.0 {
            return Err(ConvergentError::validation(
                "reinforcement delta must be >= 0",
            ));
        }
        self.with_conn(|conn| {
            let current: Option<f64> = conn
                .query_row(
                    "SELECT strength FROM stigmergy_markers WHERE marker_id = ?1",
                    params![marker_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(ConvergentError::backend(other.to_string())),
                })?;
            let Some(current) = current else {
                return Ok(None);
            };
            let updated = (current + delta).min(STRENGTH_CAP);
            conn.execute(
                "UPDATE stigmergy_markers SET strength = ?1 WHERE marker_id = ?2",
                params![updated, marker_id],
            )
            .map_err(|e| ConvergentError::backend(format!("reinforce: {e}")))?;
            debug!(marker_id, updated, "marker reinforced");
            Ok(Some(updated))
        })
    }

    /// Evaporate all markers as of `now`: recompute
    /// `strength · e^(−κ·age_days)` with age measured since the last
    /// sweep, purge strictly-below-floor markers and anything past its
    /// explicit expiry. Returns the purge count. Repeated sweeps compose:
    /// an unreinforced marker always holds
    /// `strength(t) = strength(t₀) · e^(−κ(t−t₀))`.
    ///
    /// Decay and purge run under one lock acquisition, so strength reads
    /// in a context-assembly call never interleave with a partial sweep.
    #[instrument(skip(self))]
    pub fn evaporate_at(&self, now: DateTime<Utc>) -> ConvergentResult<usize> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT marker_id, strength, decayed_at, expires_at FROM stigmergy_markers")
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            let mut to_delete: Vec<String> = Vec::new();
            let mut to_update: Vec<(f64, String)> = Vec::new();
            for row in rows {
                let (marker_id, strength, decayed_at, expires_at) =
                    row.map_err(|e| ConvergentError::backend(e.to_string()))?;

                let expired = expires_at
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .is_some_and(|t| t.with_timezone(&Utc) <= now);
                if expired {
                    to_delete.push(marker_id);
                    continue;
                }

                let last = match DateTime::parse_from_rfc3339(&decayed_at) {
                    Ok(t) => t.with_timezone(&Utc),
                    Err(e) => {
                        tracing::warn!(marker_id, error = %e, "skipping corrupt marker row");
                        continue;
                    }
                };
                let age_days = ((now - last).num_seconds().max(0) as f64) / SECONDS_PER_DAY;
                let decayed = strength * (-self.evaporation_rate * age_days).exp();

                if decayed < self.min_strength {
                    to_delete.push(marker_id);
                } else {
                    to_update.push((decayed, marker_id));
                }
            }
            drop(stmt);

            for (strength, marker_id) in &to_update {
                conn.execute(
                    "UPDATE stigmergy_markers SET strength = ?1, decayed_at = ?2
                     WHERE marker_id = ?3",
                    params![strength, now.to_rfc3339(), marker_id],
                )
                .map_err(|e| ConvergentError::backend(format!("evaporate update: {e}")))?;
            }
            for marker_id in &to_delete {
                conn.execute(
                    "DELETE FROM stigmergy_markers WHERE marker_id = ?1",
                    params![marker_id],
                )
                .map_err(|e| ConvergentError::backend(format!("evaporate purge: {e}")))?;
            }

            if !to_delete.is_empty() {
                info!(purged = to_delete.len(), "evaporation purged weak markers");
            }
            Ok(to_delete.len())
        })
    }

    /// Evaporate as of the current time.
    pub fn evaporate(&self) -> ConvergentResult<usize> {
        self.evaporate_at(Utc::now())
    }

    /// Assemble the surviving markers on the given paths into a context
    /// blob for an agent's upcoming task. Strongest markers first.
    pub fn context_for(&self, file_paths: &[String]) -> ConvergentResult<String> {
        if file_paths.is_empty() {
            return Ok(String::new());
        }
        let mut markers = Vec::new();
        for path in file_paths {
            markers.extend(self.markers_for(path)?);
        }
        if markers.is_empty() {
            return Ok(String::new());
        }
        markers.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });

        let mut lines = vec!["## Stigmergy context (from previous agents)".to_string(), String::new()];
        for marker in markers {
            lines.push(format!(
                "- [{}] `{}` (strength={:.2}, by {}): {}",
                type_str(marker.marker_type),
                marker.target,
                marker.strength,
                marker.agent_id,
                marker.content
            ));
        }
        Ok(lines.join("\n"))
    }

    /// Remove a marker outright. Returns whether it existed.
    pub fn remove_marker(&self, marker_id: &str) -> ConvergentResult<bool> {
        self.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM stigmergy_markers WHERE marker_id = ?1",
                    params![marker_id],
                )
                .map_err(|e| ConvergentError::backend(format!("remove_marker: {e}")))?;
            Ok(removed > 0)
        })
    }

    pub fn count(&self) -> ConvergentResult<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM stigmergy_markers", [], |row| row.get(0))
                .map_err(|e| ConvergentError::backend(e.to_string()))
        })
    }

    /// Marker counts per type, for health reporting.
    pub fn counts_by_type(&self) -> ConvergentResult<Vec<(String, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT marker_type, COUNT(*) FROM stigmergy_markers
                     GROUP BY marker_type ORDER BY marker_type ASC",
                )
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConvergentError::backend(e.to_string()))
        })
    }

    /// Mean strength across all markers, for health reporting.
    pub fn avg_strength(&self) -> ConvergentResult<f64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(AVG(strength), 0.0) FROM stigmergy_markers",
                [],
                |row| row.get(0),
            )
            .map_err(|e| ConvergentError::backend(e.to_string()))
        })
    }

    fn query_markers<P: rusqlite::Params>(
        &self,
        sql: &str,
        args: P,
    ) -> ConvergentResult<Vec<StigmergyMarker>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| ConvergentError::backend(e.to_string()))?;
            let rows = stmt
                .query_map(args, row_to_marker)
                .map_err(|e| ConvergentError::backend(e.to_string()))?;

            let mut markers = Vec::new();
            for row in rows {
                match row {
                    Ok(Some(marker)) => markers.push(marker),
                    Ok(None) => {}
                    Err(e) => return Err(ConvergentError::backend(e.to_string())),
                }
            }
            Ok(markers)
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> ConvergentResult<T>,
    ) -> ConvergentResult<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| ConvergentError::backend(format!("stigmergy lock poisoned: {e}")))?;
        f(&guard)
    }
}

fn type_str(marker_type: MarkerType) -> &'static str {
    match marker_type {
        MarkerType::FileModified => "file_modified",
        MarkerType::KnownIssue => "known_issue",
        MarkerType::PatternFound => "pattern_found",
        MarkerType::Dependency => "dependency",
        MarkerType::QualitySignal => "quality_signal",
    }
}

fn parse_type(s: &str) -> Option<MarkerType> {
    match s {
        "file_modified" => Some(MarkerType::FileModified),
        "known_issue" => Some(MarkerType::KnownIssue),
        "pattern_found" => Some(MarkerType::PatternFound),
        "dependency" => Some(MarkerType::Dependency),
        "quality_signal" => Some(MarkerType::QualitySignal),
        _ => None,
    }
}

fn row_to_marker(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<StigmergyMarker>> {
    let marker_id: String = row.get("marker_id")?;
    let type_raw: String = row.get("marker_type")?;
    let created_raw: String = row.get("created_at")?;
    let expires_raw: Option<String> = row.get("expires_at")?;

    let (Some(marker_type), Ok(created_at)) = (
        parse_type(&type_raw),
        DateTime::parse_from_rfc3339(&created_raw),
    ) else {
        tracing::warn!(marker_id, "skipping corrupt marker row");
        return Ok(None);
    };

    Ok(Some(StigmergyMarker {
        marker_id,
        agent_id: row.get("agent_id")?,
        marker_type,
        target: row.get("target")?,
        content: row.get("content")?,
        strength: row.get("strength")?,
        created_at: created_at.with_timezone(&Utc),
        expires_at: expires_raw
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc)),
    }))
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
