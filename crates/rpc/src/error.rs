//! Error types for the RPC transport.

use profile_mirror_core::Error as CoreError;
use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Retry policy class for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
}

/// Errors that can occur while executing a batch.
#[derive(Debug, Error)]
pub enum RpcError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the profile server
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body did not have the batch shape
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Invalid request (unusable header value, bad redirect target, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Redirect chain longer than the retry bound
    #[error("Too many redirects (last: {0})")]
    TooManyRedirects(String),
}

impl RpcError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy. Only connection-level failures are resent; a status
    /// response is final.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Http(err) if is_retryable_transport_error(err) => RetryClass::Retryable,
            Self::Http(_) | Self::Api { .. } | Self::Malformed(_) => RetryClass::Permanent,
            Self::InvalidRequest(_) | Self::TooManyRedirects(_) => RetryClass::Permanent,
        }
    }
}

/// Connection-level failures worth resending the same batch for.
fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    !err.is_timeout() && (err.is_connect() || err.is_request())
}

impl From<RpcError> for CoreError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Api { status, message } => CoreError::status(status, message),
            RpcError::Malformed(message) => CoreError::parse(message),
            other => CoreError::transport(other.to_string()),
        }
    }
}
