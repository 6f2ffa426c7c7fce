//! Error types for the DMS API client.

use thiserror::Error;

/// Result type for DMS API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// DMS API client errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// API error (non-2xx response, or a failure flag inside a 200 envelope).
    /// Carries the server-provided message verbatim when one is present.
    #[error("API error: {0}")]
    Api(String),

    /// The session token was rejected (401-equivalent)
    #[error("Session token rejected by server")]
    Unauthorized,

    /// Parse error (invalid JSON, unexpected response shape)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ApiError::Network(err.to_string())
        } else if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}
