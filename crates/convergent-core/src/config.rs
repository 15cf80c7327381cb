//! Configuration for the coordination engine.
//!
//! # Examples
//!
//! ```
//! use convergent_core::CoordinationConfig;
//!
//! let config = CoordinationConfig::default();
//! assert!((config.phi_min - 0.1).abs() < f64::EPSILON);
//! assert!((config.stigmergy_min_strength - 0.05).abs() < f64::EPSILON);
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::protocol::{Evidence, EvidenceKind, QuorumLevel};

/// Which backend the signal bus runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalBackendKind {
    Memory,
    Filesystem,
    Persistent,
}

/// Per-kind base weights for evidence. The brackets are invariants; the
/// base weight inside each bracket is an operator knob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceWeights {
    /// Bracket 0.10 – 0.30. Default: 0.20.
    pub speculative: f64,
    /// Bracket 0.50 – 0.70. Default: 0.60.
    pub committed: f64,
    /// Bracket 0.70 – 0.85. Default: 0.80.
    pub tested: f64,
    /// Bracket 0.85 – 1.00. Default: 0.90.
    pub consumed: f64,
}

impl Default for EvidenceWeights {
    fn default() -> Self {
        Self {
            speculative: 0.20,
            committed: 0.60,
            tested: 0.80,
            consumed: 0.90,
        }
    }
}

impl EvidenceWeights {
    /// The allowed weight bracket for a kind. `manual` is unbounded above
    /// zero (operator-supplied).
    pub fn bracket(kind: EvidenceKind) -> (f64, f64) {
        match kind {
            EvidenceKind::Speculative => (0.10, 0.30),
            EvidenceKind::Committed => (0.50, 0.70),
            EvidenceKind::Tested => (0.70, 0.85),
            EvidenceKind::Consumed => (0.85, 1.00),
            EvidenceKind::Manual => (0.0, f64::INFINITY),
        }
    }

    /// The effective weight of a piece of evidence: the supplied weight
    /// clamped into the kind's bracket, the configured base weight when no
    /// weight was supplied, or the raw weight for `manual`.
    pub fn effective(&self, evidence: &Evidence) -> f64 {
        if evidence.kind == EvidenceKind::Manual {
            return evidence.weight.max(0.0);
        }
        let base = match evidence.kind {
            EvidenceKind::Speculative => self.speculative,
            EvidenceKind::Committed => self.committed,
            EvidenceKind::Tested => self.tested,
            EvidenceKind::Consumed => self.consumed,
            EvidenceKind::Manual => unreachable!(),
        };
        let (lo, hi) = Self::bracket(evidence.kind);
        if evidence.weight > 0.0 {
            evidence.weight.clamp(lo, hi)
        } else {
            base
        }
    }
}

/// Configuration for every coordination subsystem.
///
/// `db_path` is the intent database; the coordination, stigmergy, and
/// signal stores derive sibling files from it. `":memory:"` keeps every
/// store in memory.
///
/// The semantic matcher hook is the one option that cannot live here: it
/// is an implementation, injected on the intent graph at construction
/// time (a null matcher is the default).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Base path for the intent database. Default: ":memory:".
    pub db_path: String,
    /// Quorum used when a consensus request omits one. Default: majority.
    pub default_quorum: QuorumLevel,
    /// λ in phi smoothing — how fast old outcomes fade. Default: 0.05/day.
    pub phi_decay_rate: f64,
    /// Phi floor — agents are never fully distrusted. Default: 0.1.
    pub phi_min: f64,
    /// Phi ceiling — agents are never fully trusted. Default: 0.95.
    pub phi_max: f64,
    /// λ in stability decay. Default: 0.05/day.
    pub stability_decay_rate: f64,
    /// Stability gap at or below which a conflict is ambiguous. Default: 0.05.
    pub stability_tie_epsilon: f64,
    /// κ in marker decay. Default: 0.1/day.
    pub stigmergy_evaporation_rate: f64,
    /// Markers strictly below this strength are purged. Default: 0.05.
    pub stigmergy_min_strength: f64,
    /// Signal bus backend. Default: memory.
    pub signal_backend: SignalBackendKind,
    /// Default consensus timeout. Default: 300s.
    pub vote_timeout_seconds: u64,
    /// Overlap score above which a structural match fires. Default: 0.6.
    pub structural_match_threshold: f64,
    /// Economics layer τ — expected-value margin above which the governor
    /// escalates instead of auto-resolving. Default: 0.0.
    pub escalation_ev_threshold: f64,
    /// Per-kind evidence base weights.
    pub evidence_weights: EvidenceWeights,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            default_quorum: QuorumLevel::Majority,
            phi_decay_rate: 0.05,
            phi_min: 0.1,
            phi_max: 0.95,
            stability_decay_rate: 0.05,
            stability_tie_epsilon: 0.05,
            stigmergy_evaporation_rate: 0.1,
            stigmergy_min_strength: 0.05,
            signal_backend: SignalBackendKind::Memory,
            vote_timeout_seconds: 300,
            structural_match_threshold: 0.6,
            escalation_ev_threshold: 0.0,
            evidence_weights: EvidenceWeights::default(),
        }
    }
}

impl CoordinationConfig {
    /// Whether every store lives in memory.
    pub fn in_memory(&self) -> bool {
        self.db_path == ":memory:"
    }

    /// Path of the intent database.
    pub fn intent_db_path(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }

    /// Path of the coordination database (scores, votes, decisions, events).
    pub fn coordination_db_path(&self) -> PathBuf {
        self.sibling("coordination")
    }

    /// Path of the stigmergy database.
    pub fn stigmergy_db_path(&self) -> PathBuf {
        self.sibling("stigmergy")
    }

    /// Path of the signal database (persistent backend only).
    pub fn signal_db_path(&self) -> PathBuf {
        self.sibling("signals")
    }

    /// Directory for filesystem signal files.
    pub fn signal_dir(&self) -> PathBuf {
        let base = PathBuf::from(&self.db_path);
        base.parent()
            .map(|p| p.join("signals"))
            .unwrap_or_else(|| PathBuf::from("signals"))
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        if self.in_memory() {
            return PathBuf::from(":memory:");
        }
        let base = PathBuf::from(&self.db_path);
        match base.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => base.with_file_name(format!("{stem}.{suffix}.db")),
            None => base.with_file_name(format!("{suffix}.db")),
        }
    }
}
