//! Error types for shape-link.

use thiserror::Error;

/// Errors that can occur while streaming a shape.
///
/// All variants carry owned, cloneable data so the most recent error can be
/// stored on the stream and surfaced again from status snapshots.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeLinkError {
    /// The server answered with a non-2xx status.
    #[error("Fetch failed with status {status_code}: {message}")]
    FetchError { status_code: u16, message: String },

    /// The transport itself failed (connection refused, reset, DNS, ...).
    #[error("Transport error: {0}")]
    TransportError(String),

    /// A successful response was missing protocol headers the server is
    /// required to send. Never retried: the server is non-conformant.
    #[error("Response from {url} is missing required headers: {}", headers.join(", "))]
    MissingHeadersError { url: String, headers: Vec<String> },

    /// Invalid client configuration (bad URL, reserved parameter, ...).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The response body could not be parsed as a message batch.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The caller-supplied error handler itself failed.
    #[error("Error handler failed: {0}")]
    HandlerError(String),

    /// The stream was cancelled via its abort signal. Not a failure.
    #[error("Shape stream aborted")]
    Aborted,

    /// Invariant violation inside the client itself.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ShapeLinkError {
    /// Returns `true` for errors the caller-supplied error handler may
    /// recover from by overriding params or headers.
    ///
    /// Missing-headers errors indicate a non-conformant server and abort
    /// signals are not failures, so neither is offered to the handler.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ShapeLinkError::FetchError { .. } | ShapeLinkError::TransportError(_)
        )
    }
}

impl From<reqwest::Error> for ShapeLinkError {
    fn from(err: reqwest::Error) -> Self {
        ShapeLinkError::TransportError(err.to_string())
    }
}

/// Result type for shape-link operations.
pub type Result<T> = std::result::Result<T, ShapeLinkError>;
