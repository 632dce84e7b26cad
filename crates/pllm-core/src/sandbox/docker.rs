//! Docker execution backend.
//!
//! Drives the `docker` CLI through `tokio::process`. Builds use the classic
//! builder so install failures surface as `returned a non-zero code` lines,
//! which the classifier keys on.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::backend::{BuildReport, ExecutionBackend, SandboxNamespace};
use super::error::{SandboxError, SandboxResult};
use super::manifest::{render_manifest, write_manifest};
use crate::classifier::is_build_error_line;
use crate::domain::EnvironmentSpec;

/// Registry responses containing this are rate-limit refusals.
const RATE_LIMIT_MARKER: &str = "toomanyrequests";

const DAEMON_DOWN_MARKER: &str = "Cannot connect to the Docker daemon";

/// Exit status `docker run` reserves for failures of docker itself, as
/// opposed to the container's own exit status.
const RUN_CLIENT_FAILURE: i32 = 125;

/// Captured output of one docker invocation.
struct CommandOutput {
    success: bool,
    code: Option<i32>,
    text: String,
}

impl CommandOutput {
    /// Daemon-down and registry rate-limit refusals reported by docker.
    fn client_error(&self, command_line: &str) -> Option<SandboxError> {
        if self.text.contains(DAEMON_DOWN_MARKER) {
            Some(SandboxError::Unavailable(self.text.trim().to_string()))
        } else if self.text.contains(RATE_LIMIT_MARKER) {
            Some(SandboxError::RateLimited(command_line.to_string()))
        } else {
            None
        }
    }
}

/// [`ExecutionBackend`] backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    program: String,
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerBackend {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    /// Run a docker management command (`build`, `rm`, `rmi`). All of its
    /// output comes from docker, so refusal markers anywhere in it count.
    async fn docker(&self, args: &[&str]) -> SandboxResult<CommandOutput> {
        let output = self.invoke(args).await?;
        match output.client_error(&self.command_line(args)) {
            Some(e) => Err(e),
            None => Ok(output),
        }
    }

    fn command_line(&self, args: &[&str]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    async fn invoke(&self, args: &[&str]) -> SandboxResult<CommandOutput> {
        let command_line = self.command_line(args);
        debug!(command = %command_line, "invoking docker");

        let output = Command::new(&self.program)
            .args(args)
            .env("DOCKER_BUILDKIT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SandboxError::Unavailable(format!("{command_line}: {e}")))?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            text,
        })
    }
}

/// A build failed when docker exited non-zero or printed any error line.
fn build_report(success: bool, text: String) -> BuildReport {
    let has_errors = text.lines().any(is_build_error_line);
    BuildReport {
        ok: success && !has_errors,
        log: text,
    }
}

fn missing_is_ok(output: CommandOutput, command: &str) -> SandboxResult<()> {
    if output.success || output.text.contains("No such") {
        Ok(())
    } else {
        Err(SandboxError::CommandFailed {
            command: command.to_string(),
            detail: output.text.trim().to_string(),
        })
    }
}

#[async_trait]
impl ExecutionBackend for DockerBackend {
    async fn build(
        &self,
        namespace: &SandboxNamespace,
        spec: &EnvironmentSpec,
        source: &Path,
    ) -> SandboxResult<BuildReport> {
        let dir = source
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let snippet_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| SandboxError::CommandFailed {
                command: "build".into(),
                detail: format!("{} has no file name", source.display()),
            })?;

        let manifest = render_manifest(spec, &snippet_name);
        let manifest_path = write_manifest(dir, namespace, &manifest)?;

        let manifest_arg = manifest_path.to_string_lossy().to_string();
        let dir_arg = dir.to_string_lossy().to_string();
        let output = self
            .docker(&[
                "build",
                "-f",
                &manifest_arg,
                "-t",
                &namespace.image,
                "--force-rm",
                &dir_arg,
            ])
            .await?;

        let report = build_report(output.success, output.text);
        info!(image = %namespace.image, ok = report.ok, "image build finished");
        Ok(report)
    }

    async fn run(&self, namespace: &SandboxNamespace) -> SandboxResult<String> {
        // A container left behind by an earlier iteration would block the name.
        self.delete_container(namespace).await?;

        // The snippet's own output is mixed in here, so only trust refusal
        // markers when docker reports that it failed itself.
        let args = [
            "run",
            "--name",
            namespace.container.as_str(),
            namespace.image.as_str(),
        ];
        let output = self.invoke(&args).await?;
        if output.code == Some(RUN_CLIENT_FAILURE) {
            if let Some(e) = output.client_error(&self.command_line(&args)) {
                return Err(e);
            }
        }
        debug!(
            container = %namespace.container,
            success = output.success,
            "container exited"
        );
        Ok(output.text)
    }

    async fn delete_container(&self, namespace: &SandboxNamespace) -> SandboxResult<()> {
        let output = self.docker(&["rm", "-f", &namespace.container]).await?;
        missing_is_ok(output, "docker rm")
    }

    async fn delete_image(&self, namespace: &SandboxNamespace) -> SandboxResult<()> {
        let output = self.docker(&["rmi", "-f", &namespace.image]).await?;
        missing_is_ok(output, "docker rmi")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_report_requires_clean_output() {
        assert!(build_report(true, "Successfully built abc\n".into()).ok);
        assert!(!build_report(false, "Step 3/5\n".into()).ok);
        let report = build_report(
            true,
            "ERROR: No matching distribution found for foo==9\n".into(),
        );
        assert!(!report.ok);
        assert!(report.log.contains("No matching distribution"));
    }

    #[test]
    fn test_missing_resources_are_not_errors() {
        let gone = CommandOutput {
            success: false,
            code: Some(1),
            text: "Error: No such container: pllm-x".into(),
        };
        assert!(missing_is_ok(gone, "docker rm").is_ok());

        let failed = CommandOutput {
            success: false,
            code: Some(1),
            text: "permission denied".into(),
        };
        assert!(matches!(
            missing_is_ok(failed, "docker rm"),
            Err(SandboxError::CommandFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let backend = DockerBackend::new("/nonexistent/pllm-docker");
        let ns = SandboxNamespace::new(Path::new("/tmp/snippet.py"), "3.8");
        let err = backend.delete_image(&ns).await.unwrap_err();
        assert!(matches!(err, SandboxError::Unavailable(_)));
    }

    /// A stand-in `docker` whose `run` prints `message` and exits `code`.
    #[cfg(unix)]
    fn fake_docker(dir: &Path, message: &str, code: i32) -> DockerBackend {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("docker");
        let script = format!(
            "#!/bin/sh\nif [ \"$1\" = run ]; then echo '{message}'; exit {code}; fi\nexit 0\n"
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DockerBackend::new(&path.to_string_lossy())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_snippet_output_is_not_a_refusal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fake_docker(dir.path(), "error: toomanyrequests from upstream api", 1);
        let ns = SandboxNamespace::new(Path::new("/tmp/snippet.py"), "3.8");

        let output = backend.run(&ns).await.unwrap();
        assert!(output.contains("toomanyrequests"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_refused_by_docker_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = fake_docker(
            dir.path(),
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock.",
            RUN_CLIENT_FAILURE,
        );
        let ns = SandboxNamespace::new(Path::new("/tmp/snippet.py"), "3.8");

        let err = backend.run(&ns).await.unwrap_err();
        assert!(matches!(err, SandboxError::Unavailable(_)));
    }
}
