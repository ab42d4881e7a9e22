//! Error types for hosting-platform operations.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`crate::ScmClient`] implementations.
#[derive(Debug, Error)]
pub enum ScmError {
    /// HTTP request failed (network, TLS, timeout)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Platform API returned a non-success status
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Platform rate limit exceeded
    #[error("rate limit exceeded, reset in {reset_in:?}")]
    RateLimitExceeded { reset_in: Duration },

    /// Token missing or rejected
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Merge was rejected by the platform (conflict, branch protection)
    #[error("merge rejected: {0}")]
    MergeRejected(String),

    /// Response body could not be decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScmError {
    /// Whether the failure is transient and worth reconsidering on a later run.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimitExceeded { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
