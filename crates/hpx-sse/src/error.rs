//! Error handling for the SSE manager.

use std::time::Duration;

use thiserror::Error;

/// The main result type used throughout the crate.
pub type SseResult<T> = Result<T, SseError>;

/// Errors surfaced by [`SseManager`](crate::SseManager) operations.
///
/// Errors are `Clone` because a single failure is fanned out to the connect
/// completion and to every listener of the notification bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SseError {
    /// `connect` was called while the connection was not idle.
    #[error("Already connected or connecting")]
    AlreadyActive,

    /// The endpoint answered with an HTTP status of 400 or above.
    #[error("Endpoint not found: status={status}")]
    EndpointNotFound { status: u16 },

    /// The connection could not be established in time.
    #[error("Connection timed out after {duration:?}")]
    ConnectionTimeout { duration: Duration },

    /// Transport-level failure (socket, TLS, body read).
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The server closed the stream.
    #[error("SSE stream ended")]
    StreamEnded,

    /// A pending connect was cancelled by an explicit disconnect.
    #[error("Connection cancelled")]
    Cancelled,

    /// The manager owning this handle has shut down.
    #[error("SSE manager is gone")]
    ManagerGone,

    /// Configuration errors.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl From<reqwest::Error> for SseError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport {
            message: e.to_string(),
        }
    }
}

impl SseError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::ConnectionTimeout { duration }
    }

    /// Create an endpoint-not-found error for the given HTTP status.
    pub fn endpoint_not_found(status: u16) -> Self {
        Self::EndpointNotFound { status }
    }

    /// Whether the retry policy applies to this error.
    ///
    /// Only transport-level failures are transient; a rejecting endpoint or
    /// an explicit cancellation is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::Transport { .. } | Self::StreamEnded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SseError::config("Path must start with /");
        assert!(matches!(err, SseError::Config { .. }));

        let err = SseError::timeout(Duration::from_secs(5));
        assert!(matches!(err, SseError::ConnectionTimeout { .. }));

        let err = SseError::endpoint_not_found(404);
        assert_eq!(err, SseError::EndpointNotFound { status: 404 });
    }

    #[test]
    fn test_transient_classification() {
        assert!(SseError::timeout(Duration::from_secs(1)).is_transient());
        assert!(SseError::transport("reset by peer").is_transient());
        assert!(SseError::StreamEnded.is_transient());
        assert!(!SseError::endpoint_not_found(500).is_transient());
        assert!(!SseError::AlreadyActive.is_transient());
        assert!(!SseError::Cancelled.is_transient());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SseError::endpoint_not_found(404).to_string(),
            "Endpoint not found: status=404"
        );
        assert_eq!(
            SseError::AlreadyActive.to_string(),
            "Already connected or connecting"
        );
    }
}
