//! Shared wiring for the integration tests.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use pllm_core::fakes::{ScriptedBackend, ScriptedOracle, StaticRegistry};
use pllm_core::{LoopServices, NameAliases, OracleSession, RetryPolicy};
use pypi_resolver::{CandidateCache, CandidateResolver};

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub source: PathBuf,
    pub oracle: Arc<ScriptedOracle>,
    pub backend: Arc<ScriptedBackend>,
    pub registry: Arc<StaticRegistry>,
    pub services: LoopServices,
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff_base_ms: 1,
    }
}

/// Write `snippet` into a fresh temp dir and wire fakes around it.
pub fn harness(
    snippet: &str,
    oracle: ScriptedOracle,
    backend: ScriptedBackend,
    registry: StaticRegistry,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("snippet.py");
    std::fs::write(&source, snippet).unwrap();

    let oracle = Arc::new(oracle);
    let backend = Arc::new(backend);
    let registry = Arc::new(registry);
    let cache = CandidateCache::new(dir.path().join("modules")).unwrap();

    let services = LoopServices {
        oracle: OracleSession::new(oracle.clone(), 2, fast_retry()),
        backend: backend.clone(),
        resolver: Arc::new(CandidateResolver::new(registry.clone(), cache)),
        names: Arc::new(NameAliases::builtin()),
        retry: fast_retry(),
    };

    Harness {
        dir,
        source,
        oracle,
        backend,
        registry,
        services,
    }
}
