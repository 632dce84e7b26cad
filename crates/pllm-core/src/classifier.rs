//! Error classification
//!
//! Maps raw build or run output to a single [`ErrorKind`] plus the minimal
//! diagnostic stanza the oracle needs. Rules are checked in a fixed order and
//! the first matching marker wins, so output mentioning several markers
//! always lands on the same kind.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    VersionNotFound,
    DependencyConflict,
    ImportError,
    ModuleNotFound,
    AttributeError,
    InvalidVersion,
    NonZeroExit,
    SyntaxError,
    Unclassified,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::VersionNotFound => "VersionNotFound",
            ErrorKind::DependencyConflict => "DependencyConflict",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::ModuleNotFound => "ModuleNotFound",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::InvalidVersion => "InvalidVersion",
            ErrorKind::NonZeroExit => "NonZeroExit",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::Unclassified => "Unclassified",
        }
    }

    /// Kinds whose repair needs the whole module list rather than one module.
    pub fn involves_module_set(self) -> bool {
        matches!(self, ErrorKind::DependencyConflict | ErrorKind::InvalidVersion)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Rule {
    kind: ErrorKind,
    marker: &'static str,
}

impl Rule {
    const fn new(kind: ErrorKind, marker: &'static str) -> Self {
        Self { kind, marker }
    }
}

/// Ordered classification rules; first match wins.
const RULES: &[Rule] = &[
    Rule::new(ErrorKind::VersionNotFound, "Could not find a version"),
    Rule::new(ErrorKind::DependencyConflict, "dependency conflicts"),
    Rule::new(ErrorKind::ImportError, "ImportError"),
    Rule::new(ErrorKind::ModuleNotFound, "ModuleNotFoundError"),
    Rule::new(ErrorKind::AttributeError, "AttributeError"),
    Rule::new(ErrorKind::InvalidVersion, "InvalidVersion"),
    Rule::new(ErrorKind::NonZeroExit, NON_ZERO_EXIT_MARKER),
    Rule::new(ErrorKind::SyntaxError, "SyntaxError"),
];

/// An installer step exited non-zero.
pub const NON_ZERO_EXIT_MARKER: &str = "non-zero code";

/// A failed install step complaining about the search path.
pub const PATH_ENVIRONMENT_MARKER: &str = "PATH environment";

/// Import failures caused only by missing runtime configuration.
pub const CONFIGURATION_MARKER: &str = "DJANGO_SETTINGS_MODULE is undefined";

/// Lines carrying any of these mark a failed image build.
pub const BUILD_ERROR_MARKERS: &[&str] = &["ERROR", "Could not fetch URL", "errorDetail"];

const TRACEBACK_HEADER: &str = "Traceback (most recent call last)";

/// How far above a marker line a traceback header is looked for.
const TRACEBACK_LOOKBACK: usize = 40;

/// Continuation lines kept after the marker line.
const MAX_TRAILING_LINES: usize = 10;

/// Result of classifying one output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ErrorKind,
    /// Minimal stanza around the marker; empty when unclassified.
    pub diagnostic: String,
    /// Set when the failure is accepted as success.
    pub caveat: Option<String>,
}

impl Classification {
    fn clean() -> Self {
        Self {
            kind: ErrorKind::Unclassified,
            diagnostic: String::new(),
            caveat: None,
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.kind == ErrorKind::Unclassified
    }
}

/// Whether a single output line marks a build failure.
pub fn is_build_error_line(line: &str) -> bool {
    BUILD_ERROR_MARKERS.iter().any(|m| line.contains(m))
}

/// Classify raw output.
pub fn classify(raw: &str) -> Classification {
    let Some(rule) = RULES.iter().find(|r| raw.contains(r.marker)) else {
        return Classification::clean();
    };

    let caveat = if rule.kind == ErrorKind::ImportError && raw.contains(CONFIGURATION_MARKER) {
        Some(format!("accepted despite import failure: {CONFIGURATION_MARKER}"))
    } else {
        None
    };

    Classification {
        kind: rule.kind,
        diagnostic: extract_diagnostic(raw, rule.marker),
        caveat,
    }
}

/// The traceback (if any) leading to the first marker line, the marker line
/// itself and the non-blank lines that follow it.
fn extract_diagnostic(raw: &str, marker: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let Some(hit) = lines.iter().position(|l| l.contains(marker)) else {
        return String::new();
    };

    let floor = hit.saturating_sub(TRACEBACK_LOOKBACK);
    let start = (floor..hit)
        .rev()
        .find(|&i| lines[i].contains(TRACEBACK_HEADER))
        .unwrap_or(hit);

    let mut end = hit + 1;
    while end < lines.len()
        && end - hit <= MAX_TRAILING_LINES
        && !lines[end].trim().is_empty()
    {
        end += 1;
    }

    lines[start..end].join("\n")
}
