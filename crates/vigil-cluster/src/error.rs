//! Error types for cluster API calls.

use thiserror::Error;

/// Result type alias for cluster API calls.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors returned by a [`ClusterApi`](crate::ClusterApi) backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The API server (or the transport) gave up waiting.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The API server answered with a non-success status.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ClusterError {
    /// Whether this error means a deadline elapsed rather than a hard failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClusterError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    /// Map an API server status code to an error.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            404 => ClusterError::NotFound(message),
            409 => ClusterError::AlreadyExists(message),
            408 | 504 => ClusterError::Timeout(message),
            _ => ClusterError::Rejected { status, message },
        }
    }
}
