//! pllm core library
//!
//! Infers a runnable environment for a Python snippet: an interpreter
//! version plus pinned third-party modules. Each candidate interpreter gets
//! its own bounded repair loop that builds the environment in a sandbox,
//! runs the snippet, classifies the failure and asks an oracle for a fix.

pub mod classifier;
pub mod coordinator;
pub mod domain;
pub mod fakes;
pub mod imports;
pub mod inference;
pub mod names;
pub mod oracle;
pub mod repair_loop;
pub mod retry;
pub mod run_log;
pub mod sandbox;
pub mod telemetry;

pub use classifier::{classify, Classification, ErrorKind};
pub use coordinator::{Coordinator, CoordinatorConfig, ExplorationResult, LoopStatus};
pub use domain::{
    AbortReason, EnvironmentSpec, FailureHistory, LoopState, ModuleEntry, PllmError, Result,
    RunOutcome, UNPINNED,
};
pub use imports::scan_imports;
pub use inference::{infer_environment, pin_initial_versions, InferredEnvironment};
pub use names::NameAliases;
pub use oracle::{
    OllamaConfig, OllamaOracle, OracleError, OracleRequest, OracleSession, OracleTask,
    PromptContext, RepairOracle,
};
pub use repair_loop::{LoopConfig, LoopReport, LoopServices, ProposedFix, RepairLoop};
pub use retry::RetryPolicy;
pub use run_log::RunLog;
pub use sandbox::{DockerBackend, ExecutionBackend, SandboxError, SandboxNamespace};

/// pllm version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
