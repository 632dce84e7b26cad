//! In-memory fakes for the oracle and execution backend (testing only)
//!
//! `ScriptedOracle` answers from per-task queues, an optional responder
//! closure and per-task defaults. `ScriptedBackend` serves scripted build
//! and run results per interpreter version and records every call, so the
//! repair loop and coordinator can be exercised without Docker or a model.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::EnvironmentSpec;
use crate::oracle::{OracleError, OracleRequest, OracleResult, OracleTask, RepairOracle};
use crate::sandbox::{BuildReport, ExecutionBackend, SandboxError, SandboxNamespace, SandboxResult};

pub use pypi_resolver::fakes::StaticRegistry;

/// Key matching every interpreter version.
pub const ANY_VERSION: &str = "*";

// ---------------------------------------------------------------------------
// ScriptedOracle
// ---------------------------------------------------------------------------

type Responder = Box<dyn Fn(&OracleRequest) -> Option<Value> + Send + Sync>;

/// Oracle answering from scripts. Unscripted questions get `null`, which
/// fails every schema.
#[derive(Default)]
pub struct ScriptedOracle {
    queued: Mutex<HashMap<OracleTask, VecDeque<OracleResult<Value>>>>,
    responder: Option<Responder>,
    defaults: HashMap<OracleTask, Value>,
    requests: Mutex<Vec<OracleRequest>>,
    unreachable: bool,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// An oracle whose every call fails as unreachable.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Queue one reply for `task`.
    pub fn reply(self, task: OracleTask, value: Value) -> Self {
        self.push(task, Ok(value))
    }

    /// Queue one failure for `task`.
    pub fn fail(self, task: OracleTask, error: OracleError) -> Self {
        self.push(task, Err(error))
    }

    fn push(mut self, task: OracleTask, entry: OracleResult<Value>) -> Self {
        self.queued
            .get_mut()
            .unwrap()
            .entry(task)
            .or_default()
            .push_back(entry);
        self
    }

    /// Reply used for `task` once its queue is empty.
    pub fn default_reply(mut self, task: OracleTask, value: Value) -> Self {
        self.defaults.insert(task, value);
        self
    }

    /// Closure consulted after the queues; `None` falls through to defaults.
    pub fn respond_with<F>(mut self, responder: F) -> Self
    where
        F: Fn(&OracleRequest) -> Option<Value> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, task: OracleTask) -> Vec<OracleRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.task == task)
            .collect()
    }
}

#[async_trait]
impl RepairOracle for ScriptedOracle {
    async fn propose(&self, request: &OracleRequest) -> OracleResult<Value> {
        self.requests.lock().unwrap().push(request.clone());
        if self.unreachable {
            return Err(OracleError::Unreachable("scripted oracle is offline".into()));
        }

        if let Some(entry) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&request.task)
            .and_then(VecDeque::pop_front)
        {
            return entry;
        }
        if let Some(value) = self.responder.as_ref().and_then(|f| f(request)) {
            return Ok(value);
        }
        Ok(self
            .defaults
            .get(&request.task)
            .cloned()
            .unwrap_or(Value::Null))
    }
}

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

/// One call received by [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Build {
        interpreter_version: String,
        requirements: Vec<String>,
    },
    Run {
        interpreter_version: String,
    },
    DeleteContainer {
        container: String,
    },
    DeleteImage {
        image: String,
    },
}

/// Backend serving scripted results per interpreter version.
///
/// Unscripted builds succeed and unscripted runs print nothing.
#[derive(Default)]
pub struct ScriptedBackend {
    builds: Mutex<HashMap<String, VecDeque<BuildReport>>>,
    runs: Mutex<HashMap<String, VecDeque<String>>>,
    run_defaults: HashMap<String, String>,
    run_delays: HashMap<String, Duration>,
    panics: HashSet<String>,
    unavailable: bool,
    failing_cleanup: bool,
    calls: Mutex<Vec<BackendCall>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that cannot be invoked at all.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Queue a build result for `version` (or [`ANY_VERSION`]).
    pub fn build_result(mut self, version: &str, ok: bool, log: &str) -> Self {
        self.builds
            .get_mut()
            .unwrap()
            .entry(version.to_string())
            .or_default()
            .push_back(BuildReport {
                ok,
                log: log.to_string(),
            });
        self
    }

    /// Queue a run output for `version` (or [`ANY_VERSION`]).
    pub fn run_output(mut self, version: &str, output: &str) -> Self {
        self.runs
            .get_mut()
            .unwrap()
            .entry(version.to_string())
            .or_default()
            .push_back(output.to_string());
        self
    }

    /// Output of every run of `version` once its queue is empty.
    pub fn default_run_output(mut self, version: &str, output: &str) -> Self {
        self.run_defaults
            .insert(version.to_string(), output.to_string());
        self
    }

    /// Make every run of `version` take `delay`.
    pub fn delay_runs(mut self, version: &str, delay: Duration) -> Self {
        self.run_delays.insert(version.to_string(), delay);
        self
    }

    /// Make every run of `version` panic.
    pub fn panic_on_run(mut self, version: &str) -> Self {
        self.panics.insert(version.to_string());
        self
    }

    /// Make container and image deletion fail.
    pub fn failing_cleanup(mut self) -> Self {
        self.failing_cleanup = true;
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Requirement lists of every build of `version`, in order.
    pub fn builds_for(&self, version: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::Build {
                    interpreter_version,
                    requirements,
                } if interpreter_version == version => Some(requirements),
                _ => None,
            })
            .collect()
    }

    pub fn runs_for(&self, version: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| match c {
                BackendCall::Run { interpreter_version } => interpreter_version == version,
                _ => false,
            })
            .count()
    }

    /// Images deleted so far.
    pub fn deleted_images(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::DeleteImage { image } => Some(image),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn pop<T>(queues: &Mutex<HashMap<String, VecDeque<T>>>, version: &str) -> Option<T> {
        let mut queues = queues.lock().unwrap();
        if let Some(entry) = queues.get_mut(version).and_then(VecDeque::pop_front) {
            return Some(entry);
        }
        queues.get_mut(ANY_VERSION).and_then(VecDeque::pop_front)
    }

    fn check_available(&self) -> SandboxResult<()> {
        if self.unavailable {
            Err(SandboxError::Unavailable("scripted backend is offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn build(
        &self,
        namespace: &SandboxNamespace,
        spec: &EnvironmentSpec,
        _source: &Path,
    ) -> SandboxResult<BuildReport> {
        self.check_available()?;
        self.record(BackendCall::Build {
            interpreter_version: namespace.interpreter_version.clone(),
            requirements: spec.requirements(),
        });
        Ok(Self::pop(&self.builds, &namespace.interpreter_version).unwrap_or(BuildReport {
            ok: true,
            log: "Successfully built".to_string(),
        }))
    }

    async fn run(&self, namespace: &SandboxNamespace) -> SandboxResult<String> {
        self.check_available()?;
        let version = namespace.interpreter_version.as_str();
        self.record(BackendCall::Run {
            interpreter_version: version.to_string(),
        });

        if let Some(delay) = self.run_delays.get(version) {
            tokio::time::sleep(*delay).await;
        }
        if self.panics.contains(version) {
            panic!("scripted backend panic for {version}");
        }

        Ok(Self::pop(&self.runs, version)
            .or_else(|| self.run_defaults.get(version).cloned())
            .or_else(|| self.run_defaults.get(ANY_VERSION).cloned())
            .unwrap_or_default())
    }

    async fn delete_container(&self, namespace: &SandboxNamespace) -> SandboxResult<()> {
        self.record(BackendCall::DeleteContainer {
            container: namespace.container.clone(),
        });
        if self.failing_cleanup {
            return Err(SandboxError::CommandFailed {
                command: "rm".into(),
                detail: "scripted failure".into(),
            });
        }
        Ok(())
    }

    async fn delete_image(&self, namespace: &SandboxNamespace) -> SandboxResult<()> {
        self.record(BackendCall::DeleteImage {
            image: namespace.image.clone(),
        });
        if self.failing_cleanup {
            return Err(SandboxError::CommandFailed {
                command: "rmi".into(),
                detail: "scripted failure".into(),
            });
        }
        Ok(())
    }
}
