//! Global error types for the social network client.
//!
//! All error categories are unified into a single `SnError` enum with
//! conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using SnError.
pub type SnResult<T> = Result<T, SnError>;

/// Unified error type covering all error categories.
#[derive(Error, Debug)]
pub enum SnError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Realtime errors --
    /// Socket-level failure. Drives the backoff policy.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unrecognised frame. Logged; dispatch continues.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Automatic reconnection gave up; a manual retry is required.
    #[error("reconnection gave up after {attempts} attempt(s)")]
    MaxRetriesExceeded {
        /// Number of automatic attempts made.
        attempts: u32,
    },

    /// An operation is not valid in the current connection state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An outbound frame failed validation before being queued.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    // -- HTTP errors --
    /// HTTP request failed.
    #[error("http error: {0}")]
    Http(String),

    /// HTTP request timed out.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Server returned an error response.
    #[error("server error (status {status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Error message from server.
        message: String,
    },

    /// The session cookie was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SnError {
    /// Whether this error should be handled by reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(self, SnError::Transport(_) | SnError::Timeout(_))
    }
}

impl From<serde_json::Error> for SnError {
    fn from(e: serde_json::Error) -> Self {
        SnError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for SnError {
    fn from(e: toml::de::Error) -> Self {
        SnError::Config(e.to_string())
    }
}
