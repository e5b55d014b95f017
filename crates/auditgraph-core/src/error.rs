use crate::{NodeId, StateField};
use thiserror::Error;

/// Failures while loading run inputs (rubric files).
#[derive(Error, Debug)]
pub enum AuditGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, AuditGraphError>;

/// Violations of the commit discipline enforced by the state store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("field `{field}` already written by `{writer}`; second write from `{attempted}` rejected")]
    AlreadyWritten {
        field: StateField,
        writer: NodeId,
        attempted: NodeId,
    },

    #[error("node `{node}` wrote field `{field}` it never declared")]
    UndeclaredWrite { node: NodeId, field: StateField },

    #[error("no reducer registered for field `{0}`")]
    MissingReducer(StateField),

    #[error("field `{field}` requires a `{expected}` reducer, `{registered}` was registered")]
    ReducerMismatch {
        field: StateField,
        expected: crate::ReducerKind,
        registered: crate::ReducerKind,
    },
}

/// A structured result that does not satisfy the data model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("score {0} outside [1, 5]")]
    ScoreOutOfRange(i64),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("malformed structured result: {0}")]
    Malformed(String),
}

/// Failure of an external collaborator call. The engine never treats these as fatal:
/// the calling node commits a degraded fragment instead.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("`{operation}` failed after {attempts} attempt(s): {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid structured result: {0}")]
    Invalid(#[from] ValidationError),

    #[error("call cancelled")]
    Cancelled,

    #[error("call failed: {0}")]
    Failed(#[from] anyhow::Error),
}

impl CallError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallError::Cancelled)
    }

    /// Whether another attempt could succeed. Cancellation is final; so is a
    /// result the caller already exhausted retries on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Failed(_) | CallError::Invalid(_))
    }
}
