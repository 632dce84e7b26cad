//! Parallel exploration coordinator
//!
//! Launches one independent repair loop per interpreter version in a
//! window around the inferred version. Loops share no mutable state; each
//! gets its own copy of the module list, its own sandbox namespace and its
//! own run log. A loop that outlives the wall-clock timeout is cancelled,
//! and its sandbox and log are cleaned up here since the loop cannot do it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, warn};

use pypi_resolver::interpreter_window;

use crate::inference::{pin_initial_versions, InferredEnvironment};
use crate::repair_loop::{LoopConfig, LoopReport, LoopServices, RepairLoop};
use crate::run_log::{log_path, RunLog};
use crate::sandbox::{teardown, SandboxNamespace};

/// Default per-loop wall-clock limit.
pub const DEFAULT_LOOP_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Window and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Versions explored on each side of the inferred one.
    pub window: usize,
    pub loop_timeout: Duration,
    /// Replace the last window entry with 2.7 when it is missing.
    pub include_legacy_interpreter: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            window: 0,
            loop_timeout: DEFAULT_LOOP_TIMEOUT,
            include_legacy_interpreter: false,
        }
    }
}

/// How one loop ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoopStatus {
    Completed { report: Box<LoopReport> },
    /// Cancelled by the wall-clock timeout.
    TimedOut,
    /// The loop task panicked.
    Crashed { reason: String },
}

/// Per-version result of an exploration.
#[derive(Debug, Clone, Serialize)]
pub struct ExplorationResult {
    pub interpreter_version: String,
    pub status: LoopStatus,
    pub log_path: PathBuf,
}

impl ExplorationResult {
    pub fn report(&self) -> Option<&LoopReport> {
        match &self.status {
            LoopStatus::Completed { report } => Some(report),
            _ => None,
        }
    }
}

pub struct Coordinator {
    services: LoopServices,
    loop_config: LoopConfig,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(services: LoopServices, loop_config: LoopConfig, config: CoordinatorConfig) -> Self {
        Self {
            services,
            loop_config,
            config,
        }
    }

    /// Interpreter versions to explore around `inferred`.
    pub fn candidate_versions(&self, inferred: &str) -> Vec<String> {
        interpreter_window(
            inferred,
            self.config.window,
            self.config.include_legacy_interpreter,
        )
    }

    /// Run one loop per candidate version and collect every result, in
    /// window order.
    pub async fn explore(
        &self,
        source: &Path,
        inferred: &InferredEnvironment,
    ) -> Vec<ExplorationResult> {
        let versions = self.candidate_versions(&inferred.interpreter_version);
        info!(versions = ?versions, source = %source.display(), "launching repair loops");

        let mut join_set = JoinSet::new();
        for (idx, version) in versions.iter().cloned().enumerate() {
            let services = self.services.clone();
            let loop_config = self.loop_config.clone();
            let modules = inferred.modules.clone();
            let source = source.to_path_buf();
            let timeout = self.config.loop_timeout;

            join_set.spawn(async move {
                let backend = services.backend.clone();
                let attempt = AssertUnwindSafe(run_with_timeout(
                    services,
                    loop_config,
                    source.clone(),
                    modules,
                    version.clone(),
                    timeout,
                ))
                .catch_unwind()
                .await;

                let result = match attempt {
                    Ok(result) => result,
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        warn!(python = %version, %reason, "repair loop crashed");
                        teardown(backend.as_ref(), &SandboxNamespace::new(&source, &version)).await;
                        ExplorationResult {
                            log_path: log_path(&source, &version),
                            interpreter_version: version,
                            status: LoopStatus::Crashed { reason },
                        }
                    }
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<ExplorationResult>> = vec![None; versions.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!(error = %e, "repair loop task was cancelled"),
            }
        }

        slots.into_iter().flatten().collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_with_timeout(
    services: LoopServices,
    loop_config: LoopConfig,
    source: PathBuf,
    modules: Vec<String>,
    version: String,
    timeout: Duration,
) -> ExplorationResult {
    let started = Utc::now();
    let path = log_path(&source, &version);
    let backend = services.backend.clone();

    let work = async {
        let spec =
            pin_initial_versions(&services.oracle, &services.resolver, &modules, &version).await;
        RepairLoop::new(&source, spec, services.clone(), loop_config)
            .run()
            .await
    };

    let status = match tokio::time::timeout(timeout, work).await {
        Ok(report) => LoopStatus::Completed {
            report: Box::new(report),
        },
        Err(_) => {
            warn!(python = %version, timeout_secs = timeout.as_secs(), "repair loop timed out");
            let namespace = SandboxNamespace::new(&source, &version);
            teardown(backend.as_ref(), &namespace).await;
            if path.exists() {
                if let Err(e) = RunLog::attach(path.clone(), started).finish("timed_out") {
                    warn!(python = %version, error = %e, "failed to finalize run log");
                }
            }
            LoopStatus::TimedOut
        }
    };

    ExplorationResult {
        interpreter_version: version,
        status,
        log_path: path,
    }
}
