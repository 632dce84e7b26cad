//! Loop states and terminal outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// States of the repair loop state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Building,
    BuiltOk,
    Running,
    RunOk,
    Classifying,
    Repairing,
    Succeeded,
    Aborted,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Succeeded | LoopState::Aborted)
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: LoopState) -> bool {
        use LoopState::*;
        match (self, next) {
            (Building, BuiltOk | Classifying | Aborted) => true,
            (BuiltOk, Running) => true,
            (Running, RunOk | Classifying | Aborted) => true,
            (RunOk, Succeeded) => true,
            (Classifying, Repairing | Succeeded) => true,
            (Repairing, Building | Aborted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Building => "building",
            LoopState::BuiltOk => "built_ok",
            LoopState::Running => "running",
            LoopState::RunOk => "run_ok",
            LoopState::Classifying => "classifying",
            LoopState::Repairing => "repairing",
            LoopState::Succeeded => "succeeded",
            LoopState::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// Why a loop gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The iteration budget ran out.
    BudgetExhausted,
    /// The oracle could not be reached at all.
    OracleExhausted,
    /// No interpreter version, or the sandbox could not be driven.
    UndefinedEnvironment,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortReason::BudgetExhausted => "budget_exhausted",
            AbortReason::OracleExhausted => "oracle_exhausted",
            AbortReason::UndefinedEnvironment => "undefined_environment",
        };
        write!(f, "{s}")
    }
}

/// Terminal result of one repair loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The snippet ran cleanly. `caveat` is set when a failure was accepted
    /// as success, e.g. a missing runtime configuration.
    Succeeded { caveat: Option<String> },
    Aborted { reason: AbortReason },
}

impl RunOutcome {
    pub fn succeeded() -> Self {
        RunOutcome::Succeeded { caveat: None }
    }

    pub fn aborted(reason: AbortReason) -> Self {
        RunOutcome::Aborted { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded { .. })
    }

    /// Single-token label used in run logs.
    pub fn label(&self) -> String {
        match self {
            RunOutcome::Succeeded { caveat: None } => "succeeded".to_string(),
            RunOutcome::Succeeded { caveat: Some(_) } => "succeeded_with_caveat".to_string(),
            RunOutcome::Aborted { reason } => format!("aborted_{reason}"),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Succeeded { caveat: None } => write!(f, "succeeded"),
            RunOutcome::Succeeded { caveat: Some(c) } => write!(f, "succeeded ({c})"),
            RunOutcome::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}
