//! Dockerfile generation.
//!
//! The manifest is a pure function of the [`EnvironmentSpec`] and the
//! snippet file name: same spec, same bytes.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::backend::SandboxNamespace;
use super::error::SandboxResult;
use crate::domain::EnvironmentSpec;

const PIP_INSTALL: &str = "pip install --trusted-host pypi.python.org --default-timeout=100";

/// Render the Dockerfile for `spec` running `snippet_name`.
pub fn render_manifest(spec: &EnvironmentSpec, snippet_name: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("FROM python:{}\n", spec.interpreter_version()));
    out.push_str("WORKDIR /app\n");
    out.push_str("RUN pip install --upgrade pip\n");
    for requirement in spec.requirements() {
        out.push_str(&format!("RUN {PIP_INSTALL} {requirement}\n"));
    }
    out.push_str(&format!("COPY {snippet_name} /app/\n"));
    out.push_str(&format!("CMD [\"python\", \"/app/{snippet_name}\"]\n"));
    out
}

/// Write `content` as the namespace's manifest inside `dir`.
pub fn write_manifest(
    dir: &Path,
    namespace: &SandboxNamespace,
    content: &str,
) -> SandboxResult<PathBuf> {
    let path = dir.join(&namespace.manifest_name);
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(&path).map_err(|e| e.error)?;
    Ok(path)
}
