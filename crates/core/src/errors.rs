//! Error types for the profile mirror core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure class used by the sync layer to decide what a failure means for buffered state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No network path; the cycle never started.
    Connectivity,
    /// The request was sent (or attempted) and failed, timed out or got a non-success status.
    Transport,
    /// The response did not have the expected shape.
    Parse,
    /// Reading or writing durable state failed.
    Persistence,
    /// A configured name (handler, host) could not be resolved.
    Configuration,
}

/// Errors that can occur while mirroring the profile.
#[derive(Debug, Error)]
pub enum Error {
    /// Reachability reported no network path.
    #[error("Network unreachable")]
    Unreachable,

    /// Transport failure, optionally carrying the HTTP status.
    #[error("Transport error{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Malformed response payload.
    #[error("Parse error: {0}")]
    Parse(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Durable storage read/write failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Persisted record could not be decoded.
    #[error("Record codec error: {0}")]
    Codec(String),

    /// No handler registered under the requested name.
    #[error("Handler not found: {0}")]
    HandlerResolution(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The background worker is gone (client shut down).
    #[error("Sync worker stopped")]
    WorkerStopped,
}

impl Error {
    /// Create a transport error without a status.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Create a transport error for a non-success HTTP status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable => ErrorKind::Connectivity,
            Self::Transport { .. } | Self::WorkerStopped => ErrorKind::Transport,
            Self::Parse(_) | Self::Json(_) => ErrorKind::Parse,
            Self::Persistence(_) | Self::Codec(_) => ErrorKind::Persistence,
            Self::HandlerResolution(_) | Self::Config(_) => ErrorKind::Configuration,
        }
    }

    /// HTTP status if this is a status-carrying transport error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display_includes_status() {
        let err = Error::status(502, "bad gateway");
        assert_eq!(err.to_string(), "Transport error (502): bad gateway");
        assert_eq!(err.status_code(), Some(502));

        let err = Error::transport("connection reset");
        assert_eq!(err.to_string(), "Transport error: connection reset");
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn json_errors_classify_as_parse() {
        let err: Error = serde_json::from_str::<Vec<String>>("{").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(Error::Unreachable.kind(), ErrorKind::Connectivity);
        assert_eq!(Error::persistence("disk full").kind(), ErrorKind::Persistence);
    }
}
