//! Repair oracle interface.
//!
//! The oracle is the external collaborator that reads error text and
//! proposes fixes. The core only depends on [`RepairOracle`]; the
//! [`OracleSession`] wrapper enforces retries and schema validation.

pub mod error;
pub mod ollama;
pub mod request;
pub mod session;

use async_trait::async_trait;

pub use error::{OracleError, OracleResult};
pub use ollama::{
    OllamaConfig, OllamaOracle, DEFAULT_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_REQUEST_TIMEOUT,
};
pub use request::{OracleRequest, OracleTask, PromptContext, ResponseSchema};
pub use session::{
    is_valid_version, EnvironmentReply, OracleSession, VersionReply, DEFAULT_ORACLE_ATTEMPTS,
    NONE_VERSION,
};

/// Structured-answer oracle.
#[async_trait]
pub trait RepairOracle: Send + Sync {
    /// Answer `request` with a JSON value. Validation is the caller's job.
    async fn propose(&self, request: &OracleRequest) -> OracleResult<serde_json::Value>;
}
