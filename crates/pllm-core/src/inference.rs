//! Initial environment inference and version pinning.
//!
//! Before any loop starts, the snippet is scanned for imports and the
//! oracle is asked for an interpreter version and module list. Each loop
//! then pins its own initial versions against the candidates the resolver
//! finds for that loop's interpreter.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pypi_resolver::{normalize_interpreter, CandidateResolver, FALLBACK_INTERPRETER};

use crate::domain::{EnvironmentSpec, PllmError, Result, UNPINNED};
use crate::imports::scan_imports;
use crate::names::NameAliases;
use crate::oracle::{OracleSession, OracleTask, PromptContext};

/// Interpreter version and modules inferred for a snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredEnvironment {
    pub interpreter_version: String,
    pub modules: Vec<String>,
    /// Whether the oracle answered, as opposed to the scan-only fallback.
    pub from_oracle: bool,
}

/// Infer the environment for the snippet at `source`.
///
/// With `use_scanned_imports`, imports found in the file are handed to the
/// oracle as context and merged into its answer. When the oracle gives no
/// usable answer (or cannot be reached) the result falls back to
/// [`FALLBACK_INTERPRETER`] and the scanned modules.
pub async fn infer_environment(
    oracle: &OracleSession,
    names: &NameAliases,
    source: &Path,
    use_scanned_imports: bool,
) -> Result<InferredEnvironment> {
    let content = std::fs::read_to_string(source).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PllmError::SnippetNotFound(source.display().to_string()),
        _ => PllmError::Io(e),
    })?;

    let scanned = if use_scanned_imports {
        names.scanned_names(scan_imports(&content))
    } else {
        Vec::new()
    };

    let context = PromptContext {
        source: Some(content),
        scanned_imports: scanned.clone(),
        ..Default::default()
    };

    let reply = match oracle.infer_environment(context).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "environment inference failed, using fallback");
            None
        }
    };

    let inferred = match reply {
        Some(reply) => {
            let mut modules = scanned;
            for module in names.install_names(&reply.python_modules) {
                if !modules.contains(&module) {
                    modules.push(module);
                }
            }
            InferredEnvironment {
                interpreter_version: normalize_interpreter(&reply.python_version),
                modules,
                from_oracle: true,
            }
        }
        None => InferredEnvironment {
            interpreter_version: FALLBACK_INTERPRETER.to_string(),
            modules: scanned,
            from_oracle: false,
        },
    };

    info!(
        python = %inferred.interpreter_version,
        modules = ?inferred.modules,
        from_oracle = inferred.from_oracle,
        "inferred environment"
    );
    Ok(inferred)
}

/// Build the starting [`EnvironmentSpec`] for one interpreter version.
///
/// Every module gets the version the oracle picks from the resolver's
/// candidates; without an answer the newest candidate is used, and a module
/// with no candidates at all is left unpinned.
pub async fn pin_initial_versions(
    oracle: &OracleSession,
    resolver: &CandidateResolver,
    modules: &[String],
    interpreter_version: &str,
) -> EnvironmentSpec {
    let mut pins: Vec<(String, String)> = Vec::with_capacity(modules.len());

    for module in modules {
        let candidates = resolver.resolve(module, interpreter_version).await;
        let newest = candidates.last().cloned();

        let context = PromptContext {
            interpreter_version: Some(interpreter_version.to_string()),
            module: Some(module.clone()),
            candidates,
            ..Default::default()
        };
        let picked = match oracle.propose_version(OracleTask::SelectVersion, context).await {
            Ok(Some(reply)) => reply.version,
            Ok(None) => None,
            Err(e) => {
                warn!(%module, error = %e, "version selection failed");
                None
            }
        };

        let version = picked
            .or(newest)
            .unwrap_or_else(|| UNPINNED.to_string());
        pins.push((module.clone(), version));
    }

    EnvironmentSpec::new(interpreter_version, pins)
}
