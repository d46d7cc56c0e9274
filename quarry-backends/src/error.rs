//! Error types for backend clients.

use thiserror::Error;

/// Result type alias using [`BackendError`].
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors from backend clients.
///
/// Distinct failure modes stay distinct so callers and operators can tell a
/// refused command from a TLS failure from an empty result set. Every
/// variant is a per-metric collection failure, never fatal to the service.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The connection configuration is unusable.
    #[error("invalid connection config: {0}")]
    Config(String),

    /// Could not reach or authenticate with the backend.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The backend did not answer within the allowed time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The client exists but was never opened for this connection name.
    #[error("backend '{0}' is not available")]
    Unavailable(String),

    /// The query itself was malformed.
    #[error("invalid query: {0}")]
    Query(String),

    /// The command is outside the read-only allow-list.
    #[error("command '{0}' is not allowed, use a read-only command")]
    CommandNotAllowed(String),

    /// The backend reported an execution error.
    #[error("query failed: {0}")]
    Execution(String),

    /// The query returned no rows or a nil reply.
    #[error("query returned no result")]
    EmptyResult,

    /// The query returned NULL where a value was required.
    #[error("query returned a null value")]
    NullResult,

    /// The result could not be read as a finite number.
    #[error("result is not numeric: {0}")]
    NonNumeric(String),

    /// An HTTP backend answered outside the 2xx range.
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not valid JSON.
    #[error("invalid JSON response: {0}")]
    Json(String),

    /// The configured result path did not match the response shape.
    #[error("result field '{path}': {reason}")]
    Path { path: String, reason: String },
}

impl BackendError {
    pub(crate) fn path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
