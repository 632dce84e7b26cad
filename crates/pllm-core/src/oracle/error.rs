//! Error types for the oracle module.

use crate::retry::RateLimited;

/// Errors produced by oracle transports and response parsing.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The endpoint could not be reached at all.
    #[error("oracle unreachable: {0}")]
    Unreachable(String),

    /// A request outlived the client timeout, e.g. a slow generation.
    #[error("oracle timed out: {0}")]
    Timeout(String),

    #[error("oracle rate limited: {0}")]
    RateLimited(String),

    /// The reply was not JSON or did not fit the expected schema.
    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),

    #[error("oracle response missing field: {0}")]
    MissingField(String),

    #[error("oracle http error: {0}")]
    Http(String),
}

impl RateLimited for OracleError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, OracleError::RateLimited(_))
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OracleError::Timeout(e.to_string())
        } else if e.is_connect() {
            OracleError::Unreachable(e.to_string())
        } else if e.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            OracleError::RateLimited(e.to_string())
        } else {
            OracleError::Http(e.to_string())
        }
    }
}

/// Result type for oracle operations.
pub type OracleResult<T> = std::result::Result<T, OracleError>;
