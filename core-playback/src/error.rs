//! # Playback Error Types
//!
//! Errors returned by the session controller's commands.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur while controlling a playback session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    // ========================================================================
    // Queue Errors
    // ========================================================================
    /// The request does not fit the current queue (bad index, unknown track,
    /// skip past the end with repeat off, seek with nothing loaded).
    #[error("Invalid queue operation: {0}")]
    InvalidQueueOperation(String),

    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// An engine command failed or timed out.
    #[error("Engine command '{command}' failed: {message}")]
    EngineCommandFailure {
        command: &'static str,
        message: String,
    },

    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// A backend call failed. Never affects playback state.
    #[error("Backend call failed: {0}")]
    BackendCallFailure(String),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The controller was shut down.
    #[error("Playback session closed")]
    SessionClosed,

    /// Configuration was rejected while starting the controller.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PlaybackError {
    pub(crate) fn engine(command: &'static str, err: BridgeError) -> Self {
        PlaybackError::EngineCommandFailure {
            command,
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        PlaybackError::InvalidQueueOperation(message.into())
    }

    /// Returns `true` if retrying the same command may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlaybackError::EngineCommandFailure { .. } | PlaybackError::BackendCallFailure(_)
        )
    }

    /// Returns `true` if the error came from the host engine.
    pub fn is_engine_error(&self) -> bool {
        matches!(self, PlaybackError::EngineCommandFailure { .. })
    }
}

impl From<core_runtime::Error> for PlaybackError {
    fn from(err: core_runtime::Error) -> Self {
        PlaybackError::Config(err.to_string())
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_failures_are_transient() {
        let err = PlaybackError::engine("play", BridgeError::OperationFailed("busy".into()));
        assert!(err.is_transient());
        assert!(err.is_engine_error());
        assert_eq!(
            err.to_string(),
            "Engine command 'play' failed: Bridge operation failed: busy"
        );
    }

    #[test]
    fn queue_errors_are_not_transient() {
        let err = PlaybackError::invalid("start index 5 out of bounds");
        assert!(!err.is_transient());
        assert!(!PlaybackError::SessionClosed.is_transient());
    }

    #[test]
    fn runtime_errors_map_to_config() {
        let err: PlaybackError = core_runtime::Error::Config("bad".into()).into();
        assert!(matches!(err, PlaybackError::Config(_)));
    }
}
