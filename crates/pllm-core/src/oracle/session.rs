//! Validated oracle calls.
//!
//! An [`OracleSession`] wraps a [`RepairOracle`] with the contract the
//! repair loop relies on: replies are checked against the task's schema,
//! schema failures and timeouts each spend one of a fixed number of
//! attempts before the call degrades to "no answer". Rate limits are slept
//! on. Only an unreachable endpoint is surfaced as an error.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{OracleError, OracleResult};
use super::request::{OracleRequest, OracleTask, PromptContext};
use super::RepairOracle;
use crate::retry::{retry_on_rate_limit, RetryPolicy};

/// Attempts per oracle call before it yields no answer.
pub const DEFAULT_ORACLE_ATTEMPTS: u32 = 5;

/// Version string marking "remove this module".
pub const NONE_VERSION: &str = "none";

static VERSION_RE: OnceLock<Regex> = OnceLock::new();

/// Whether `version` is an acceptable concrete version string.
pub fn is_valid_version(version: &str) -> bool {
    let re = VERSION_RE.get_or_init(|| {
        Regex::new(r"^\d+(\.\d+){1,2}([a-zA-Z0-9]+)?$").expect("version regex")
    });
    re.is_match(version)
}

/// Reply to an environment inference question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentReply {
    pub python_version: String,
    pub python_modules: Vec<String>,
}

/// Reply naming a module and a version; `version == None` means remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionReply {
    pub module: String,
    pub version: Option<String>,
}

fn field<'a>(value: &'a Value, name: &str) -> OracleResult<&'a Value> {
    value
        .get(name)
        .ok_or_else(|| OracleError::MissingField(name.to_string()))
}

fn non_empty_string(value: &Value, name: &str) -> OracleResult<String> {
    match field(value, name)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        other => Err(OracleError::InvalidResponse(format!(
            "field {name} must be a non-empty string, got {other}"
        ))),
    }
}

fn parse_module(value: &Value) -> OracleResult<String> {
    non_empty_string(value, "module")
}

fn parse_version(value: &Value) -> OracleResult<VersionReply> {
    let module = non_empty_string(value, "module")?;
    let version = match field(value, "version")? {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case(NONE_VERSION) {
                None
            } else if is_valid_version(s) {
                Some(s.to_string())
            } else {
                return Err(OracleError::InvalidResponse(format!("malformed version {s:?}")));
            }
        }
        other => {
            return Err(OracleError::InvalidResponse(format!(
                "field version must be a string, got {other}"
            )))
        }
    };
    Ok(VersionReply { module, version })
}

fn parse_environment(value: &Value) -> OracleResult<EnvironmentReply> {
    let python_version = match field(value, "python_version")? {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(OracleError::InvalidResponse(format!(
                "field python_version must be a version, got {other}"
            )))
        }
    };
    let python_modules = match field(value, "python_modules")? {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        // Some models answer with a name → version map.
        Value::Object(map) => map.keys().cloned().collect(),
        other => {
            return Err(OracleError::InvalidResponse(format!(
                "field python_modules must be a list, got {other}"
            )))
        }
    };
    Ok(EnvironmentReply {
        python_version,
        python_modules,
    })
}

/// Schema-checked access to a [`RepairOracle`].
#[derive(Clone)]
pub struct OracleSession {
    oracle: Arc<dyn RepairOracle>,
    attempts: u32,
    retry: RetryPolicy,
}

impl OracleSession {
    pub fn new(oracle: Arc<dyn RepairOracle>, attempts: u32, retry: RetryPolicy) -> Self {
        Self {
            oracle,
            attempts: attempts.max(1),
            retry,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    async fn query<T>(
        &self,
        request: &OracleRequest,
        parse: fn(&Value) -> OracleResult<T>,
    ) -> OracleResult<Option<T>> {
        let oracle = &self.oracle;
        for attempt in 1..=self.attempts {
            let reply = retry_on_rate_limit(&self.retry, move || oracle.propose(request)).await;
            match reply {
                Ok(value) => match parse(&value) {
                    Ok(parsed) => return Ok(Some(parsed)),
                    Err(e) => {
                        debug!(task = ?request.task, attempt, error = %e, "oracle reply rejected")
                    }
                },
                Err(OracleError::Unreachable(reason)) => {
                    return Err(OracleError::Unreachable(reason));
                }
                Err(e) => warn!(task = ?request.task, attempt, error = %e, "oracle call failed"),
            }
        }
        warn!(task = ?request.task, attempts = self.attempts, "oracle gave no usable answer");
        Ok(None)
    }

    /// Interpreter version and module list for a snippet.
    pub async fn infer_environment(
        &self,
        context: PromptContext,
    ) -> OracleResult<Option<EnvironmentReply>> {
        let request = OracleRequest::new(OracleTask::InferEnvironment, context);
        self.query(&request, parse_environment).await
    }

    /// Ask a module-schema question (`IdentifyModule`, `IdentifyInstallFailure`).
    pub async fn identify_module(
        &self,
        task: OracleTask,
        context: PromptContext,
    ) -> OracleResult<Option<String>> {
        let request = OracleRequest::new(task, context);
        self.query(&request, parse_module).await
    }

    /// Ask a module+version question (`SelectVersion`, `ProposeVersion`, `ProposeFix`).
    pub async fn propose_version(
        &self,
        task: OracleTask,
        context: PromptContext,
    ) -> OracleResult<Option<VersionReply>> {
        let request = OracleRequest::new(task, context);
        self.query(&request, parse_version).await
    }
}
