//! Crate-level error taxonomy for pllm.

use crate::oracle::OracleError;
use crate::sandbox::SandboxError;
use pypi_resolver::RegistryError;

/// pllm domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PllmError {
    #[error("invalid environment spec: {0}")]
    InvalidSpec(String),

    #[error("snippet not found: {0}")]
    SnippetNotFound(String),

    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pllm domain operations.
pub type Result<T> = std::result::Result<T, PllmError>;
