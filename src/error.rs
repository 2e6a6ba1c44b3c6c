//! Error kinds surfaced by the session controller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// The ratings store could not be reached or rejected the call.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Score out of range, malformed date and similar input problems.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The session record exists but no logger is running for it.
    #[error("failed to launch logger for session {session_id}: {reason}")]
    ProcessSpawn { session_id: String, reason: String },

    #[error("failed to interrupt logger for session {session_id}: {reason}")]
    ProcessSignal { session_id: String, reason: String },

    #[error("cannot {operation} while {state}")]
    Precondition {
        operation: &'static str,
        state: &'static str,
    },
}

impl ControllerError {
    pub fn store(err: anyhow::Error) -> Self {
        Self::StoreUnavailable(format!("{err:#}"))
    }

    pub fn validation(err: anyhow::Error) -> Self {
        Self::Validation(format!("{err:#}"))
    }

    pub fn precondition(operation: &'static str, state: &'static str) -> Self {
        Self::Precondition { operation, state }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition { .. })
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
