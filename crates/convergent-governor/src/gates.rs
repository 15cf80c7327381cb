//! The gate contract: external evidence producers.
//!
//! The engine does not implement gates — test suites, type checkers, and
//! compile probes live in the collaborator layer. It defines the
//! interface and the contract that verdicts are reproducible for a given
//! scope snapshot. A gate crash or timeout is treated as a failed verdict
//! and surfaces to the governor, never as a panic.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use convergent_core::{ConvergentError, ConvergentResult};

/// What a gate is asked to check: a named scope, typically a set of paths,
/// pinned to a snapshot so verdicts are reproducible.
#[derive(Debug, Clone, Default)]
pub struct GateScope {
    pub name: String,
    pub paths: Vec<String>,
    pub snapshot_id: Option<String>,
}

impl GateScope {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// The verdict a gate produced.
#[derive(Debug, Clone, PartialEq)]
pub struct GateVerdict {
    pub gate: String,
    pub passed: bool,
    pub detail: String,
    pub duration: Duration,
}

impl GateVerdict {
    pub fn passed(gate: &str, detail: &str) -> Self {
        Self {
            gate: gate.to_string(),
            passed: true,
            detail: detail.to_string(),
            duration: Duration::ZERO,
        }
    }

    pub fn failed(gate: &str, detail: &str) -> Self {
        Self {
            passed: false,
            ..Self::passed(gate, detail)
        }
    }
}

/// An external evidence producer.
pub trait Gate: Send + Sync {
    fn name(&self) -> &str;

    /// Per-gate timeout; the governor evaluation blocks at most this long.
    fn timeout(&self) -> Duration {
        Duration::from_secs(120)
    }

    /// Produce a verdict for the scope. Must be reproducible for a given
    /// scope snapshot.
    fn run(&self, scope: &GateScope) -> ConvergentResult<GateVerdict>;
}

/// Run a gate with its timeout. Errors and timeouts come back as failed
/// verdicts carrying the failure detail, so the constraints layer can
/// treat them uniformly.
pub fn run_gate(gate: &Arc<dyn Gate>, scope: &GateScope) -> GateVerdict {
    let name = gate.name().to_string();
    let timeout = gate.timeout();
    let started = Instant::now();

    let (tx, rx) = mpsc::channel();
    let worker_gate = Arc::clone(gate);
    let worker_scope = scope.clone();
    std::thread::spawn(move || {
        let verdict = worker_gate.run(&worker_scope);
        // The receiver may have timed out and gone away.
        let _ = tx.send(verdict);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(mut verdict)) => {
            verdict.duration = started.elapsed();
            verdict
        }
        Ok(Err(err)) => {
            warn!(gate = %name, error = %err, "gate errored; treating as failed");
            let detail = ConvergentError::GateFailure {
                gate: name.clone(),
                detail: err.to_string(),
            }
            .to_string();
            GateVerdict {
                gate: name,
                passed: false,
                detail,
                duration: started.elapsed(),
            }
        }
        Err(_) => {
            warn!(gate = %name, ?timeout, "gate timed out; treating as failed");
            let detail = ConvergentError::Timeout {
                operation: format!("gate '{name}'"),
                seconds: timeout.as_secs(),
            }
            .to_string();
            GateVerdict {
                gate: name,
                passed: false,
                detail,
                duration: started.elapsed(),
            }
        }
    }
}

/// A fixed-verdict gate, useful for wiring recorded verdicts and tests.
pub struct StaticGate {
    name: String,
    passed: bool,
    detail: String,
}

impl StaticGate {
    pub fn passing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: "ok".to_string(),
        }
    }

    pub fn failing(name: &str, detail: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: detail.to_string(),
        }
    }
}

impl Gate for StaticGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _scope: &GateScope) -> ConvergentResult<GateVerdict> {
        Ok(GateVerdict {
            gate: self.name.clone(),
            passed: self.passed,
            detail: self.detail.clone(),
            duration: Duration::ZERO,
        })
    }
}
