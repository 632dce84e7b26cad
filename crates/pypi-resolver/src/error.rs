//! Error types for pypi-resolver

use thiserror::Error;

/// Errors that can occur while querying or caching release metadata
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The package index could not be reached
    #[error("Package index unreachable: {0}")]
    Unreachable(String),

    /// The package index has no project with this name
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// Non-success HTTP status from the package index
    #[error("HTTP error: {0}")]
    Http(String),

    /// The interpreter version is not in the release table
    #[error("Unknown interpreter version: {0}")]
    UnknownInterpreter(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            RegistryError::Unreachable(err.to_string())
        } else {
            RegistryError::Http(err.to_string())
        }
    }
}
