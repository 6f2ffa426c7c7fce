//! Error types for the client core.

use dms_api::ApiError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Client core errors.
///
/// Every operation resolves to a success value or one of these; no
/// operation leaves component state undefined on error, and failures
/// never destroy prior valid state (token, snapshot, cache).
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required input field is missing or malformed. Detected locally,
    /// before any network traffic.
    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// The session is absent, expired, or was rejected by the backend.
    /// Callers route back to the OTP flow on this; it is never retried
    /// silently.
    #[error("Session is missing or no longer valid")]
    SessionInvalid,

    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Remote failure, with the server-provided message when available
    #[error("API error: {0}")]
    Api(String),

    /// Parse error (unexpected response shape)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Key-value persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A file exceeded the configured size bound at acquisition time
    #[error("File is {size} bytes, which exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    /// The operation was cancelled by the user
    #[error("Operation canceled")]
    Canceled,

    /// The same task already has an operation in flight
    #[error("Operation already in flight")]
    Busy,

    /// The operation is not valid in the current state
    #[error("Invalid state: {0}")]
    State(String),

    /// Configuration error (missing environment variable, bad value)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// The remote-provided message without any wrapping, for surfaces
    /// that display server errors verbatim.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Api(message) | Self::Network(message) => Some(message),
            _ => None,
        }
    }
}

impl From<ApiError> for CoreError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => Self::SessionInvalid,
            ApiError::Network(message) => Self::Network(message),
            ApiError::Api(message) => Self::Api(message),
            ApiError::Parse(message) => Self::Parse(message),
        }
    }
}
