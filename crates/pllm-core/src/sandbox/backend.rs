//! Execution backend contract and per-loop namespaces.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::error::SandboxResult;
use crate::domain::EnvironmentSpec;

/// Image, container and manifest names owned by one repair loop.
///
/// Names are derived from the snippet path and the interpreter version, so
/// loops for different versions of the same snippet never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxNamespace {
    pub interpreter_version: String,
    pub image: String,
    pub container: String,
    pub manifest_name: String,
}

impl SandboxNamespace {
    pub fn new(source: &Path, interpreter_version: &str) -> Self {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let mut slug: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        slug = slug.trim_matches('-').to_string();
        if slug.is_empty() {
            slug = "snippet".to_string();
        }

        let digest = hex::encode(Sha256::digest(source.to_string_lossy().as_bytes()));
        let short = &digest[..10];

        Self {
            interpreter_version: interpreter_version.to_string(),
            image: format!("pllm/{slug}:{short}-py{interpreter_version}"),
            container: format!("pllm-{slug}-{short}-py{interpreter_version}"),
            manifest_name: format!("Dockerfile-llm-{interpreter_version}"),
        }
    }
}

/// Outcome of one image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub ok: bool,
    pub log: String,
}

/// Isolated build-and-run facility for one environment.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Build an image for `spec` with `source` as the entry point.
    async fn build(
        &self,
        namespace: &SandboxNamespace,
        spec: &EnvironmentSpec,
        source: &Path,
    ) -> SandboxResult<BuildReport>;

    /// Run the built image and return its combined output.
    async fn run(&self, namespace: &SandboxNamespace) -> SandboxResult<String>;

    async fn delete_container(&self, namespace: &SandboxNamespace) -> SandboxResult<()>;

    async fn delete_image(&self, namespace: &SandboxNamespace) -> SandboxResult<()>;
}

/// Delete a namespace's container and image, logging and swallowing failures.
pub async fn teardown(backend: &dyn ExecutionBackend, namespace: &SandboxNamespace) {
    if let Err(e) = backend.delete_container(namespace).await {
        warn!(container = %namespace.container, error = %e, "container cleanup failed");
    }
    if let Err(e) = backend.delete_image(namespace).await {
        warn!(image = %namespace.image, error = %e, "image cleanup failed");
    }
}
