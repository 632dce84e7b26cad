//! Repair loop
//!
//! One bounded build → run → classify → repair cycle for a single
//! interpreter version. The loop is an explicit state machine: every state
//! it enters is appended to a transition trace, and the iteration counter
//! is checked after each repair step so the budget is enforced exactly.
//!
//! On any terminal state the loop's sandbox resources are deleted and its
//! run log is finalized.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use pypi_resolver::CandidateResolver;

use crate::classifier::{
    classify, Classification, ErrorKind, NON_ZERO_EXIT_MARKER, PATH_ENVIRONMENT_MARKER,
};
use crate::domain::{
    AbortReason, EnvironmentSpec, FailureHistory, LoopState, ModuleEntry, RunOutcome, UNPINNED,
};
use crate::names::NameAliases;
use crate::oracle::{
    OracleResult, OracleSession, OracleTask, PromptContext, DEFAULT_ORACLE_ATTEMPTS,
};
use crate::retry::{retry_on_rate_limit, RetryPolicy};
use crate::run_log::{log_path, RunLog};
use crate::sandbox::{teardown, BuildReport, ExecutionBackend, SandboxNamespace, SandboxResult};

/// Default iteration budget.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Budget settings for one loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoopConfig {
    /// Repair steps allowed before the loop aborts.
    pub max_iterations: u32,
    /// Attempts per oracle call before it yields no answer.
    pub oracle_attempts: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            oracle_attempts: DEFAULT_ORACLE_ATTEMPTS,
        }
    }
}

/// Collaborators shared by every loop of a run. Cloning is cheap.
#[derive(Clone)]
pub struct LoopServices {
    pub oracle: OracleSession,
    pub backend: Arc<dyn ExecutionBackend>,
    pub resolver: Arc<CandidateResolver>,
    pub names: Arc<NameAliases>,
    pub retry: RetryPolicy,
}

/// A fix the loop decided to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposedFix {
    Pin { module: String, version: String },
    Remove { module: String },
    NoFix,
}

impl ProposedFix {
    fn module(&self) -> Option<&str> {
        match self {
            ProposedFix::Pin { module, .. } | ProposedFix::Remove { module } => Some(module),
            ProposedFix::NoFix => None,
        }
    }
}

/// Everything a finished loop knows.
#[derive(Debug, Clone, Serialize)]
pub struct LoopReport {
    pub interpreter_version: String,
    pub outcome: RunOutcome,
    /// Completed repair steps.
    pub iterations: u32,
    pub transitions: Vec<LoopState>,
    pub spec: EnvironmentSpec,
    pub history: FailureHistory,
    pub log_path: Option<PathBuf>,
    pub duration_ms: u64,
}

pub struct RepairLoop {
    source: PathBuf,
    spec: EnvironmentSpec,
    history: FailureHistory,
    namespace: SandboxNamespace,
    services: LoopServices,
    config: LoopConfig,
    state: Option<LoopState>,
    transitions: Vec<LoopState>,
    iterations: u32,
    log: Option<RunLog>,
}

impl RepairLoop {
    pub fn new(
        source: &Path,
        spec: EnvironmentSpec,
        services: LoopServices,
        config: LoopConfig,
    ) -> Self {
        let namespace = SandboxNamespace::new(source, spec.interpreter_version());
        Self {
            source: source.to_path_buf(),
            spec,
            history: FailureHistory::new(),
            namespace,
            services,
            config,
            state: None,
            transitions: Vec::new(),
            iterations: 0,
            log: None,
        }
    }

    /// Start from an existing failure history instead of an empty one.
    pub fn with_history(mut self, history: FailureHistory) -> Self {
        self.history = history;
        self
    }

    pub fn namespace(&self) -> &SandboxNamespace {
        &self.namespace
    }

    /// Drive the loop to a terminal state.
    #[instrument(name = "repair_loop", skip_all, fields(python = %self.spec.interpreter_version()))]
    pub async fn run(mut self) -> LoopReport {
        let started = Instant::now();

        let path = log_path(&self.source, self.spec.interpreter_version());
        match RunLog::create(path, self.spec.interpreter_version()) {
            Ok(log) => self.log = Some(log),
            Err(e) => warn!(error = %e, "run log unavailable, continuing without it"),
        }

        let outcome = self.drive().await;
        self.finish(outcome, started).await
    }

    fn enter(&mut self, next: LoopState) {
        let allowed = match self.state {
            None => matches!(next, LoopState::Building | LoopState::Aborted),
            Some(current) => current.can_transition_to(next),
        };
        debug_assert!(allowed, "illegal transition {:?} -> {next}", self.state);
        debug!(state = %next, iteration = self.iterations, "transition");
        self.state = Some(next);
        self.transitions.push(next);
    }

    fn abort(&mut self, reason: AbortReason) -> RunOutcome {
        self.enter(LoopState::Aborted);
        RunOutcome::aborted(reason)
    }

    async fn drive(&mut self) -> RunOutcome {
        if self.spec.interpreter_version().is_empty() {
            warn!("no interpreter version to build for");
            return self.abort(AbortReason::UndefinedEnvironment);
        }

        loop {
            self.enter(LoopState::Building);
            let tested = self.spec.modules().to_vec();

            let build = match self.build().await {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "build could not be started");
                    return self.abort(AbortReason::UndefinedEnvironment);
                }
            };

            let (raw, classification) = if build.ok {
                self.enter(LoopState::BuiltOk);
                self.enter(LoopState::Running);
                let output = match self.execute().await {
                    Ok(output) => output,
                    Err(e) => {
                        warn!(error = %e, "run could not be started");
                        return self.abort(AbortReason::UndefinedEnvironment);
                    }
                };
                let classification = classify(&output);
                if classification.is_unclassified() {
                    self.enter(LoopState::RunOk);
                    self.record(&tested, ErrorKind::Unclassified, &output);
                    self.enter(LoopState::Succeeded);
                    return RunOutcome::succeeded();
                }
                (output, classification)
            } else {
                info!("build failed");
                let classification = classify(&build.log);
                (build.log, classification)
            };

            self.enter(LoopState::Classifying);
            info!(kind = %classification.kind, "classified failure");
            self.record(&tested, classification.kind, &raw);

            if let Some(caveat) = &classification.caveat {
                info!(%caveat, "accepting failure as success");
                self.enter(LoopState::Succeeded);
                return RunOutcome::Succeeded {
                    caveat: Some(caveat.clone()),
                };
            }

            self.enter(LoopState::Repairing);
            self.history.record_failure(classification.kind);
            if let Err(e) = self.repair(&classification, &raw).await {
                warn!(error = %e, "oracle unreachable");
                return self.abort(AbortReason::OracleExhausted);
            }
            self.iterations += 1;

            if self.iterations >= self.config.max_iterations {
                info!(iterations = self.iterations, "iteration budget exhausted");
                return self.abort(AbortReason::BudgetExhausted);
            }
        }
    }

    async fn build(&self) -> SandboxResult<BuildReport> {
        let backend = &self.services.backend;
        let (namespace, spec, source) = (&self.namespace, &self.spec, self.source.as_path());
        retry_on_rate_limit(&self.services.retry, move || {
            backend.build(namespace, spec, source)
        })
        .await
    }

    async fn execute(&self) -> SandboxResult<String> {
        let backend = &self.services.backend;
        let namespace = &self.namespace;
        retry_on_rate_limit(&self.services.retry, move || backend.run(namespace)).await
    }

    fn record(&mut self, modules: &[ModuleEntry], kind: ErrorKind, raw: &str) {
        let iteration = self.iterations + 1;
        if let Some(log) = &self.log {
            if let Err(e) = log.record_iteration(iteration, modules, kind, raw) {
                warn!(error = %e, "failed to append to run log");
            }
        }
    }

    // ------------------------------------------------------------------
    // Repair strategies
    // ------------------------------------------------------------------

    async fn repair(&mut self, classification: &Classification, raw: &str) -> OracleResult<()> {
        match classification.kind {
            ErrorKind::ImportError if raw.contains(NON_ZERO_EXIT_MARKER) => {
                self.repair_install_order(classification).await
            }
            ErrorKind::NonZeroExit if raw.contains(PATH_ENVIRONMENT_MARKER) => {
                self.repair_by_removal(classification).await
            }
            ErrorKind::Unclassified => {
                info!("nothing classifiable to repair");
                Ok(())
            }
            _ => {
                let fix = self.request_fix(classification).await?;
                self.apply_fix(fix);
                Ok(())
            }
        }
    }

    fn context(&self, classification: &Classification) -> PromptContext {
        PromptContext {
            interpreter_version: Some(self.spec.interpreter_version().to_string()),
            error_kind: Some(classification.kind),
            diagnostic: Some(classification.diagnostic.clone()),
            modules: self.spec.modules().to_vec(),
            ..Default::default()
        }
    }

    /// Versions of `module` that must not be proposed: every tried version
    /// plus the one currently pinned.
    fn excluded(&self, module: &str) -> Vec<String> {
        let mut excluded = self.history.tried(module).to_vec();
        if let Some(current) = self.spec.version_of(module) {
            if current != UNPINNED && !excluded.iter().any(|v| v == current) {
                excluded.push(current.to_string());
            }
        }
        excluded
    }

    /// Ask the oracle for a fix to `classification`.
    async fn request_fix(&mut self, classification: &Classification) -> OracleResult<ProposedFix> {
        if classification.kind.involves_module_set() {
            let context = self.context(classification);
            return self.ask_version(OracleTask::ProposeFix, context, None).await;
        }

        let identified = self
            .services
            .oracle
            .identify_module(OracleTask::IdentifyModule, self.context(classification))
            .await?;
        let Some(module) = identified.and_then(|m| self.services.names.install_name(&m)) else {
            info!("oracle named no installable module");
            return Ok(ProposedFix::NoFix);
        };

        if let Some(current) = self.spec.version_of(&module).map(str::to_string) {
            if current != UNPINNED {
                self.history.record_tried(&module, &current);
            }
        }

        let candidates = self
            .services
            .resolver
            .resolve(&module, self.spec.interpreter_version())
            .await;
        let context = PromptContext {
            module: Some(module.clone()),
            candidates,
            excluded: self.excluded(&module),
            ..self.context(classification)
        };
        self.ask_version(OracleTask::ProposeVersion, context, Some(&module))
            .await
    }

    /// Ask a module+version question, rejecting a repeated version once
    /// before giving up with [`ProposedFix::NoFix`].
    async fn ask_version(
        &self,
        task: OracleTask,
        mut context: PromptContext,
        module: Option<&str>,
    ) -> OracleResult<ProposedFix> {
        for round in 1..=2 {
            let reply = self
                .services
                .oracle
                .propose_version(task, context.clone())
                .await?;
            let Some(reply) = reply else {
                return Ok(ProposedFix::NoFix);
            };

            let target = match module {
                Some(m) => m.to_string(),
                None => match self.services.names.install_name(&reply.module) {
                    Some(m) => m,
                    None => return Ok(ProposedFix::NoFix),
                },
            };

            let Some(version) = reply.version else {
                return Ok(ProposedFix::Remove { module: target });
            };

            let excluded = self.excluded(&target);
            if excluded.contains(&version) {
                warn!(module = %target, %version, round, "oracle repeated an excluded version");
                context.module = Some(target);
                context.excluded = excluded;
                continue;
            }
            return Ok(ProposedFix::Pin {
                module: target,
                version,
            });
        }
        Ok(ProposedFix::NoFix)
    }

    fn apply_fix(&mut self, fix: ProposedFix) {
        match fix {
            ProposedFix::Pin { module, version } => {
                info!(%module, %version, "pinning module");
                self.spec.pin(&module, &version);
                self.history.record_tried(&module, &version);
            }
            ProposedFix::Remove { module } => {
                if self.spec.remove(&module) {
                    info!(%module, "removed module");
                } else {
                    debug!(%module, "module to remove was not installed");
                }
            }
            ProposedFix::NoFix => info!("no fix this iteration"),
        }
    }

    /// An import failed after an install step exited non-zero: the module
    /// the import fix names must install immediately before the module whose
    /// install failed (a build-time dependency of its setup script). A module
    /// not yet in the list is added with the proposed version first.
    async fn repair_install_order(&mut self, classification: &Classification) -> OracleResult<()> {
        let import_fix = self.request_fix(classification).await?;
        let failed_install = self
            .services
            .oracle
            .identify_module(OracleTask::IdentifyInstallFailure, self.context(classification))
            .await?
            .and_then(|m| self.services.names.install_name(&m));

        let import_module = import_fix.module().map(str::to_string);
        let (Some(import_module), Some(failed)) = (import_module, failed_install) else {
            self.apply_fix(import_fix);
            return Ok(());
        };
        if import_module == failed || !self.spec.contains(&failed) {
            self.apply_fix(import_fix);
            return Ok(());
        }

        if !self.spec.contains(&import_module) {
            let version = match &import_fix {
                ProposedFix::Pin { version, .. } => version.as_str(),
                _ => UNPINNED,
            };
            self.spec.pin(&import_module, version);
        }
        self.spec.place_before(&import_module, &failed);
        info!(module = %import_module, before = %failed, "reordered installs");
        Ok(())
    }

    /// An install step failed on the search path: drop the module.
    async fn repair_by_removal(&mut self, classification: &Classification) -> OracleResult<()> {
        let failed = self
            .services
            .oracle
            .identify_module(OracleTask::IdentifyInstallFailure, self.context(classification))
            .await?
            .and_then(|m| self.services.names.install_name(&m));

        match failed {
            Some(module) => self.apply_fix(ProposedFix::Remove { module }),
            None => self.apply_fix(ProposedFix::NoFix),
        }
        Ok(())
    }

    async fn finish(self, outcome: RunOutcome, started: Instant) -> LoopReport {
        teardown(self.services.backend.as_ref(), &self.namespace).await;

        if let Some(log) = &self.log {
            if let Err(e) = log.finish(&outcome.label()) {
                warn!(error = %e, "failed to finalize run log");
            }
        }

        info!(%outcome, iterations = self.iterations, "repair loop finished");
        LoopReport {
            interpreter_version: self.spec.interpreter_version().to_string(),
            outcome,
            iterations: self.iterations,
            transitions: self.transitions,
            spec: self.spec,
            history: self.history,
            log_path: self.log.map(|l| l.path().to_path_buf()),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
