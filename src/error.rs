//! Error types shared across capture, recording, aggregation and playback

use crate::playback::{ConflictDetail, EmitError};
use crate::session::SessionState;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The platform refused the global input hook. Nothing was changed.
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("no recording is in progress")]
    NotRecording,

    #[error("cannot {operation} while {state}")]
    StateConflict {
        state: SessionState,
        operation: &'static str,
    },

    /// Post-offset timing is not monotonic and the policy is to refuse
    #[error("schedule conflict: {0}")]
    ScheduleConflict(ConflictDetail),

    #[error("emit failed: {0}")]
    EmitFailed(#[from] EmitError),

    #[error("no sample with id {0}")]
    UnknownSample(u64),

    #[error("invalid sample: {0}")]
    InvalidSample(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn conflict(state: SessionState, operation: &'static str) -> Self {
        Error::StateConflict { state, operation }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_conflict_message_names_state_and_operation() {
        let err = Error::conflict(SessionState::Recording, "start playback");
        assert_eq!(err.to_string(), "cannot start playback while recording");
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.to_string().contains("IO error"));
    }
}
