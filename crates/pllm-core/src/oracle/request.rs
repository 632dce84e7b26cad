//! Oracle requests and their response schemas.
//!
//! Every call site asks one [`OracleTask`]. The task fixes the response
//! schema the reply is validated against and the prompt wording, while the
//! [`PromptContext`] carries the structured facts (error text, module list,
//! candidates, excluded versions) so fakes can answer without parsing prose.

use serde::{Deserialize, Serialize};

use crate::classifier::ErrorKind;
use crate::domain::ModuleEntry;

/// Response shapes the core validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSchema {
    /// `{"python_version": "...", "python_modules": [...]}`
    Environment,
    /// `{"module": "..."}`
    Module,
    /// `{"module": "...", "version": "..."}`; `version` may be `"none"`
    ModuleVersion,
}

impl ResponseSchema {
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            ResponseSchema::Environment => &["python_version", "python_modules"],
            ResponseSchema::Module => &["module"],
            ResponseSchema::ModuleVersion => &["module", "version"],
        }
    }

    fn format_hint(self) -> &'static str {
        match self {
            ResponseSchema::Environment => {
                r#"Respond with JSON only: {"python_version": "<major.minor>", "python_modules": ["<module>", ...]}"#
            }
            ResponseSchema::Module => r#"Respond with JSON only: {"module": "<module name>"}"#,
            ResponseSchema::ModuleVersion => {
                r#"Respond with JSON only: {"module": "<module name>", "version": "<version or none>"}"#
            }
        }
    }
}

/// The question being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleTask {
    /// Infer interpreter version and modules from the snippet.
    InferEnvironment,
    /// Pick an initial version for one module.
    SelectVersion,
    /// Name the module implicated by an error.
    IdentifyModule,
    /// Propose a version for a module implicated by an error.
    ProposeVersion,
    /// One-step fix for errors that involve the whole module set.
    ProposeFix,
    /// Name the module whose install exited non-zero.
    IdentifyInstallFailure,
}

impl OracleTask {
    pub fn schema(self) -> ResponseSchema {
        match self {
            OracleTask::InferEnvironment => ResponseSchema::Environment,
            OracleTask::IdentifyModule | OracleTask::IdentifyInstallFailure => {
                ResponseSchema::Module
            }
            OracleTask::SelectVersion | OracleTask::ProposeVersion | OracleTask::ProposeFix => {
                ResponseSchema::ModuleVersion
            }
        }
    }
}

/// Structured facts handed to the oracle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    pub interpreter_version: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub diagnostic: Option<String>,
    /// Module the question is about, when there is one.
    pub module: Option<String>,
    /// Current install list.
    pub modules: Vec<ModuleEntry>,
    /// Registry candidates for `module`.
    pub candidates: Vec<String>,
    /// Versions that must not be proposed again.
    pub excluded: Vec<String>,
    pub source: Option<String>,
    pub scanned_imports: Vec<String>,
}

/// A rendered oracle request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub task: OracleTask,
    pub context: PromptContext,
    pub prompt: String,
}

impl OracleRequest {
    pub fn new(task: OracleTask, context: PromptContext) -> Self {
        let prompt = render_prompt(task, &context);
        Self {
            task,
            context,
            prompt,
        }
    }

    pub fn schema(&self) -> ResponseSchema {
        self.task.schema()
    }
}

fn render_prompt(task: OracleTask, ctx: &PromptContext) -> String {
    let mut out = String::new();
    let python = ctx.interpreter_version.as_deref().unwrap_or("unknown");

    match task {
        OracleTask::InferEnvironment => {
            out.push_str(
                "Infer the Python version and third-party modules needed to run this file.\n",
            );
            if !ctx.scanned_imports.is_empty() {
                out.push_str(&format!(
                    "Imports found in the file: {}\n",
                    ctx.scanned_imports.join(", ")
                ));
            }
            if let Some(source) = &ctx.source {
                out.push_str("File contents:\n");
                out.push_str(source);
                out.push('\n');
            }
        }
        OracleTask::SelectVersion => {
            let module = ctx.module.as_deref().unwrap_or_default();
            out.push_str(&format!(
                "Pick a version of the module {module} that works with Python {python}.\n"
            ));
        }
        OracleTask::IdentifyModule => {
            out.push_str(&format!(
                "Running a Python {python} program failed. \
                 Name the single module responsible for this error.\n"
            ));
        }
        OracleTask::ProposeVersion => {
            let module = ctx.module.as_deref().unwrap_or_default();
            out.push_str(&format!(
                "Running a Python {python} program failed because of the module {module}. \
                 Propose a different version of {module}, or none to remove it.\n"
            ));
        }
        OracleTask::ProposeFix => {
            out.push_str(&format!(
                "Installing modules for Python {python} failed. \
                 Name one module to change and the version to use, or none to remove it.\n"
            ));
        }
        OracleTask::IdentifyInstallFailure => {
            out.push_str(&format!(
                "An install step for Python {python} returned a non-zero code. \
                 Name the module whose install failed.\n"
            ));
        }
    }

    if let Some(kind) = ctx.error_kind {
        out.push_str(&format!("Error type: {kind}\n"));
    }
    if let Some(diagnostic) = ctx.diagnostic.as_deref().filter(|d| !d.is_empty()) {
        out.push_str("Error output:\n");
        out.push_str(diagnostic);
        out.push('\n');
    }
    if !ctx.modules.is_empty() {
        let list: Vec<String> = ctx.modules.iter().map(ModuleEntry::requirement).collect();
        out.push_str(&format!("Installed modules: {}\n", list.join(", ")));
    }
    if !ctx.candidates.is_empty() {
        out.push_str(&format!("Choose from these versions: {}\n", ctx.candidates.join(", ")));
    }
    if !ctx.excluded.is_empty() {
        out.push_str(&format!("Do not use these versions: {}\n", ctx.excluded.join(", ")));
    }
    out.push_str(task.schema().format_hint());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_schemas() {
        assert_eq!(OracleTask::InferEnvironment.schema(), ResponseSchema::Environment);
        assert_eq!(OracleTask::IdentifyModule.schema(), ResponseSchema::Module);
        assert_eq!(OracleTask::IdentifyInstallFailure.schema(), ResponseSchema::Module);
        assert_eq!(OracleTask::ProposeFix.schema(), ResponseSchema::ModuleVersion);
        assert_eq!(ResponseSchema::ModuleVersion.required_fields(), ["module", "version"]);
    }

    #[test]
    fn test_prompt_lists_exclusions_and_candidates() {
        let request = OracleRequest::new(
            OracleTask::ProposeVersion,
            PromptContext {
                interpreter_version: Some("3.7".into()),
                error_kind: Some(ErrorKind::AttributeError),
                diagnostic: Some("AttributeError: module 'numpy' has no attribute 'float'".into()),
                module: Some("numpy".into()),
                candidates: vec!["1.15.0".into(), "1.16.0".into()],
                excluded: vec!["1.16.0".into()],
                ..Default::default()
            },
        );
        assert!(request.prompt.contains("Python 3.7"));
        assert!(request.prompt.contains("Choose from these versions: 1.15.0, 1.16.0"));
        assert!(request.prompt.contains("Do not use these versions: 1.16.0"));
        assert!(request.prompt.contains("AttributeError"));
        assert!(request.prompt.ends_with(r#""version": "<version or none>"}"#));
    }
}
