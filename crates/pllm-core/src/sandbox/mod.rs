//! Sandbox execution.
//!
//! A repair loop builds and runs its environment through an
//! [`ExecutionBackend`]; [`DockerBackend`] is the production backend. Each
//! loop owns a [`SandboxNamespace`] so concurrent loops never share an
//! image, container or manifest file.

pub mod backend;
pub mod docker;
pub mod error;
pub mod manifest;

pub use backend::{teardown, BuildReport, ExecutionBackend, SandboxNamespace};
pub use docker::DockerBackend;
pub use error::{SandboxError, SandboxResult};
pub use manifest::{render_manifest, write_manifest};
