//! Stigmergy and signal-bus protocol models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Categories of stigmergy trail markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerType {
    /// "I changed src/auth.rs" — warns of potential write contention.
    FileModified,
    /// "The login endpoint has a race condition" — knowledge sharing.
    KnownIssue,
    /// "This repo uses the repository pattern for DB access" — style guidance.
    PatternFound,
    /// "Module X depends on module Y" — sequencing hints.
    Dependency,
    /// "Tests in auth_test.rs are flaky" — reliability info.
    QualitySignal,
}

/// A trail marker left by an agent for future agents to find.
///
/// Strength decays over time (evaporation); markers strictly below the
/// configured floor are purged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StigmergyMarker {
    pub marker_id: String,
    pub agent_id: String,
    pub marker_type: MarkerType,
    /// What this marker refers to (file path, module name, etc.).
    pub target: String,
    pub content: String,
    pub strength: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A message on the signal bus. Broadcast when `target_agent` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: String,
    pub source_agent: String,
    pub target_agent: Option<String>,
    /// Opaque payload, typically JSON.
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn broadcast(signal_type: &str, source_agent: &str, payload: &str) -> Self {
        Self {
            signal_type: signal_type.to_string(),
            source_agent: source_agent.to_string(),
            target_agent: None,
            payload: payload.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn targeted(signal_type: &str, source_agent: &str, target_agent: &str, payload: &str) -> Self {
        Self {
            target_agent: Some(target_agent.to_string()),
            ..Self::broadcast(signal_type, source_agent, payload)
        }
    }
}
