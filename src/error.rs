//! Error types and handling for event streams
//!
//! Every failure that crosses a delivery boundary is a `StreamError` value:
//! producer-reported errors, failures returned by consumer callbacks and
//! errors returned by cleanup functions all travel through `StreamResult`.

/// Main error type for event stream operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// A delivery function was called while the producer was still running
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// An argument or sequence had the wrong shape
    #[error("Type error: {0}")]
    Type(String),
    /// A pending request was abandoned because the stream was closed
    #[error("Operation cancelled")]
    Cancelled,
    /// Deferred work could not be handed to a scheduler
    #[error("Scheduler error: {0}")]
    Scheduler(String),
    /// Custom error with message
    #[error("Stream error: {0}")]
    Custom(String),
}

impl StreamError {
    /// Shorthand for a `Custom` error
    pub fn custom(msg: impl Into<String>) -> Self {
        StreamError::Custom(msg.into())
    }

    pub(crate) fn not_ready() -> Self {
        StreamError::InvalidState("Cannot send values while initializing".to_string())
    }

    pub(crate) fn empty_reduce() -> Self {
        StreamError::Type("Cannot reduce an empty sequence".to_string())
    }
}

impl From<&str> for StreamError {
    fn from(msg: &str) -> Self {
        StreamError::Custom(msg.to_string())
    }
}

impl From<String> for StreamError {
    fn from(msg: String) -> Self {
        StreamError::Custom(msg)
    }
}

/// Result type for event stream operations
pub type StreamResult<T> = Result<T, StreamError>;
