//! Failure history of one repair loop.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::classifier::ErrorKind;
use crate::domain::environment::normalize_key;

/// What a loop has already seen: per-kind failure counts, the versions
/// tried for each module and the most recent failure kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureHistory {
    error_counts: BTreeMap<ErrorKind, u32>,
    tried_versions: BTreeMap<String, Vec<String>>,
    last_kind: Option<ErrorKind>,
}

impl FailureHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one failure of `kind` and make it the most recent.
    pub fn record_failure(&mut self, kind: ErrorKind) {
        *self.error_counts.entry(kind).or_insert(0) += 1;
        self.last_kind = Some(kind);
    }

    pub fn count(&self, kind: ErrorKind) -> u32 {
        self.error_counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn error_counts(&self) -> &BTreeMap<ErrorKind, u32> {
        &self.error_counts
    }

    pub fn last_kind(&self) -> Option<ErrorKind> {
        self.last_kind
    }

    /// Remember that `version` of `module` was tried.
    ///
    /// Returns `false` if it was already recorded; the list never holds
    /// duplicates.
    pub fn record_tried(&mut self, module: &str, version: &str) -> bool {
        let tried = self.tried_versions.entry(normalize_key(module)).or_default();
        if tried.iter().any(|v| v == version) {
            return false;
        }
        tried.push(version.to_string());
        true
    }

    /// Versions already tried for `module`, in the order they were tried.
    pub fn tried(&self, module: &str) -> &[String] {
        self.tried_versions
            .get(&normalize_key(module))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_tried(&self, module: &str, version: &str) -> bool {
        self.tried(module).iter().any(|v| v == version)
    }
}
