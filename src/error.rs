//! Error Handling
//!
//! Typed errors for the replica engine plus a coarse categorization used by
//! callers (and log lines) to decide whether an operation is worth retrying.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Result type for replica operations
pub type Result<T> = std::result::Result<T, ReplicaError>;

/// Errors surfaced by the remote store client and the synchronizer
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// Connection, timeout or body read failure
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote store answered with a non-success status
    #[error("remote store returned {status} for {url}: {body}")]
    Status {
        status: StatusCode,
        url: String,
        body: String,
    },

    /// A record or collection body could not be decoded
    #[error("malformed payload in {collection} at {key}: {message}")]
    Malformed {
        collection: String,
        key: String,
        message: String,
    },

    /// Nested records cannot be written without their owner key
    #[error("{collection} record {id} has no owner key")]
    MissingOwner { collection: String, id: String },

    /// Updates and deletes need an id
    #[error("{collection} record has no id")]
    MissingId { collection: String },

    /// An open stream delivered nothing, not even a keep-alive, for too long
    #[error("{collection} stream idle for {idle:?}")]
    StreamIdle { collection: String, idle: Duration },

    /// Invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl ReplicaError {
    pub(crate) fn malformed(
        collection: &str,
        key: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Malformed {
            collection: collection.to_string(),
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Categorize this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            ReplicaError::Http(_) | ReplicaError::StreamIdle { .. } => ErrorCategory::Network,
            ReplicaError::Status { status, .. } if status.is_server_error() => {
                ErrorCategory::Network
            }
            ReplicaError::Status { .. } => ErrorCategory::RemoteWrite,
            ReplicaError::Malformed { .. } => ErrorCategory::MalformedPayload,
            ReplicaError::MissingOwner { .. }
            | ReplicaError::MissingId { .. }
            | ReplicaError::Config(_) => ErrorCategory::Configuration,
        }
    }
}

/// Categorized error types for better handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Stream connect/read failures and HTTP timeouts (retryable)
    Network,

    /// The remote store rejected a request
    RemoteWrite,

    /// One record or body failed to parse; the rest is unaffected
    MalformedPayload,

    /// Missing keys or bad settings (not retryable)
    Configuration,
}

impl ErrorCategory {
    /// Check if this error category is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network)
    }
}
