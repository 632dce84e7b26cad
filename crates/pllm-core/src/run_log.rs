//! Per-loop run log.
//!
//! One append-only, YAML-shaped text file per (snippet, interpreter version),
//! written next to the snippet as `output_data_<version>.yml`:
//!
//! ```text
//! ---
//! python_version: 3.7
//! start_time: 1718000000.123
//! iterations:
//!   iteration_1:
//!     - python_module: {requests: 2.0.0}
//!     - error_type: ModuleNotFound
//!     - error: |
//!         ModuleNotFoundError: No module named 'urllib3'
//! outcome: succeeded
//! end_time: 1718000042.456
//! total_time: 42.333
//! ```
//!
//! The tracing output is for operators; this file is the record of what a
//! loop tried.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::classifier::ErrorKind;
use crate::domain::{ModuleEntry, Result};

const BLOCK_INDENT: &str = "        ";

/// Log file for `source` at `interpreter_version`.
pub fn log_path(source: &Path, interpreter_version: &str) -> PathBuf {
    let dir = source.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("output_data_{interpreter_version}.yml"))
}

fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Terminal escape sequences (colours, cursor movement).
static ANSI_RE: OnceLock<Regex> = OnceLock::new();

/// Unwrap `{"stream": "..."}` / `{"error": "..."}` build-log records.
fn unwrap_json_record(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    ["stream", "error", "status"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn clean_line(line: &str) -> String {
    let line = line.replace('\t', "  ");
    let re = ANSI_RE
        .get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("ansi regex"));
    let line = re.replace_all(&line, "").into_owned();
    line.chars()
        .filter(|c| !c.is_control() && !matches!(c, '␛' | '␈'))
        .collect()
}

/// Clean raw output into the indented body of an `error: |` block.
///
/// JSON build records are unwrapped, tabs become two spaces, control
/// characters are dropped, blank lines are skipped and progress lines are
/// re-indented to the block margin. Lines after a caret marker line are
/// indented two further spaces.
pub fn format_error_block(raw: &str) -> String {
    let mut expanded: Vec<String> = Vec::new();
    for line in raw.lines() {
        match unwrap_json_record(line) {
            Some(inner) => expanded.extend(inner.lines().map(str::to_string)),
            None => expanded.push(line.to_string()),
        }
    }

    let mut out = String::new();
    let mut extend = "";
    let mut previous_had_caret = false;
    for line in expanded {
        let line = clean_line(&line);
        if line.trim().is_empty() {
            continue;
        }
        if previous_had_caret {
            extend = "  ";
        }
        let body = if line.contains("ETA") || line.contains("0us/step") {
            line.trim_start().to_string()
        } else if line.contains("TabError:") {
            format!("  {line}")
        } else {
            line.clone()
        };
        out.push_str(extend);
        out.push_str(BLOCK_INDENT);
        out.push_str(&body);
        out.push('\n');
        previous_had_caret = line.contains('^');
    }
    out
}

fn render_modules(modules: &[ModuleEntry]) -> String {
    let pairs: Vec<String> = modules
        .iter()
        .map(|m| format!("{}: {}", m.name, m.version))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

/// Append-only writer for one loop's log.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    started: DateTime<Utc>,
}

impl RunLog {
    /// Start a new log document at `path`.
    pub fn create(path: PathBuf, interpreter_version: &str) -> Result<Self> {
        let log = Self {
            path,
            started: Utc::now(),
        };
        log.append(&format!(
            "---\npython_version: {interpreter_version}\nstart_time: {:.3}\niterations:\n",
            unix_seconds(log.started)
        ))?;
        Ok(log)
    }

    /// Handle on a log another writer started at `started`.
    pub fn attach(path: PathBuf, started: DateTime<Utc>) -> Self {
        Self { path, started }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    fn open(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?)
    }

    fn append(&self, text: &str) -> Result<()> {
        let mut file = self.open()?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Record one iteration: the modules that were under test, the kind of
    /// failure and the cleaned output.
    pub fn record_iteration(
        &self,
        iteration: u32,
        modules: &[ModuleEntry],
        kind: ErrorKind,
        raw: &str,
    ) -> Result<()> {
        let mut entry = format!(
            "  iteration_{iteration}:\n    - python_module: {}\n    - error_type: {kind}\n    - error: |\n",
            render_modules(modules)
        );
        let block = format_error_block(raw);
        if block.is_empty() {
            entry.push_str(BLOCK_INDENT);
            entry.push_str("(no output)\n");
        } else {
            entry.push_str(&block);
        }
        self.append(&entry)
    }

    /// Close the document with the outcome, end time and total duration.
    pub fn finish(&self, outcome: &str) -> Result<()> {
        let ended = Utc::now();
        let total = (ended - self.started).num_milliseconds() as f64 / 1000.0;
        self.append(&format!(
            "outcome: {outcome}\nend_time: {:.3}\ntotal_time: {total:.3}\n",
            unix_seconds(ended)
        ))
    }
}
