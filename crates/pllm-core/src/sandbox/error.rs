//! Error types for the sandbox module.

use crate::retry::RateLimited;

/// Errors produced by execution backends.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The backend could not be invoked at all.
    #[error("execution backend unavailable: {0}")]
    Unavailable(String),

    #[error("execution backend rate limited: {0}")]
    RateLimited(String),

    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RateLimited for SandboxError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, SandboxError::RateLimited(_))
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
