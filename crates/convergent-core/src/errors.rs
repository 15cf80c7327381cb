//! Error taxonomy for the coordination engine.
//!
//! Validation and duplicate errors surface to the caller before the store
//! is touched. Conflicts are data (see [`crate::conflict`]), never errors.
//! Backend and gate errors carry enough detail to decide whether a retry
//! is safe.

/// Errors produced by the coordination engine.
#[derive(Debug, thiserror::Error)]
pub enum ConvergentError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("intent id '{intent_id}' reused with differing content")]
    DuplicateIntent { intent_id: String },

    #[error("conflict between '{mine}' and '{theirs}' cannot be resolved without escalation ({class})")]
    ConflictUnresolved {
        mine: String,
        theirs: String,
        class: String,
    },

    #[error("hard constraint on '{subject}' violated: {detail}")]
    ConstraintViolation { subject: String, detail: String },

    #[error("gate '{gate}' failed: {detail}")]
    GateFailure { gate: String, detail: String },

    #[error("replay diverged at merge {index}: recorded snapshot {recorded}, recomputed {recomputed}")]
    ReplayDivergence {
        index: usize,
        recorded: String,
        recomputed: String,
    },

    #[error("backend unavailable: {detail}")]
    BackendUnavailable { detail: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("coordination budget exceeded: {detail}")]
    BudgetExceeded { detail: String },
}

impl ConvergentError {
    /// A validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// A backend error with the given detail.
    pub fn backend(detail: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            detail: detail.into(),
        }
    }
}

pub type ConvergentResult<T> = Result<T, ConvergentError>;
