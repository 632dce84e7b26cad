//! Domain models for pllm.
//!
//! - `EnvironmentSpec`: interpreter version plus ordered module pins
//! - `FailureHistory`: what a repair loop has already tried
//! - `LoopState` / `RunOutcome`: the repair loop state machine and its result

pub mod environment;
pub mod error;
pub mod history;
pub mod outcome;

pub use environment::{normalize_key, EnvironmentSpec, ModuleEntry, UNPINNED};
pub use error::{PllmError, Result};
pub use history::FailureHistory;
pub use outcome::{AbortReason, LoopState, RunOutcome};
