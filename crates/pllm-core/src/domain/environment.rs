//! EnvironmentSpec: the candidate environment under repair.
//!
//! A spec is one interpreter version plus an ordered list of modules, each
//! pinned to a version or left [`UNPINNED`]. The order is the install order.
//! Every mutation first snapshots the module list into `previous_modules`,
//! so a caller can always see what the last repair changed.

use serde::{Deserialize, Serialize};

/// Version sentinel for a module that is installed without a pin.
pub const UNPINNED: &str = "unpinned";

/// One module of the install list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    pub version: String,
}

impl ModuleEntry {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: normalize_key(name),
            version: version.trim().to_string(),
        }
    }

    pub fn is_pinned(&self) -> bool {
        !self.version.is_empty() && self.version != UNPINNED
    }

    /// Installer requirement, `name==version` or the bare name.
    pub fn requirement(&self) -> String {
        if self.is_pinned() {
            format!("{}=={}", self.name, self.version)
        } else {
            self.name.clone()
        }
    }
}

/// Canonical module key: trimmed, lowercase and without a dotted suffix.
pub fn normalize_key(name: &str) -> String {
    let trimmed = name.trim();
    let head = trimmed.split('.').next().unwrap_or(trimmed);
    head.to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    interpreter_version: String,
    modules: Vec<ModuleEntry>,
    previous_modules: Option<Vec<ModuleEntry>>,
}

impl EnvironmentSpec {
    /// Build a spec from `(name, version)` pairs in install order.
    ///
    /// Names are normalized; later duplicates of a key are dropped.
    pub fn new<I, N, V>(interpreter_version: &str, modules: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut entries: Vec<ModuleEntry> = Vec::new();
        for (name, version) in modules {
            let entry = ModuleEntry::new(name.as_ref(), version.as_ref());
            if entry.name.is_empty() || entries.iter().any(|e| e.name == entry.name) {
                continue;
            }
            entries.push(entry);
        }
        Self {
            interpreter_version: interpreter_version.trim().to_string(),
            modules: entries,
            previous_modules: None,
        }
    }

    pub fn interpreter_version(&self) -> &str {
        &self.interpreter_version
    }

    pub fn modules(&self) -> &[ModuleEntry] {
        &self.modules
    }

    /// Module list as it was before the most recent mutation.
    pub fn previous_modules(&self) -> Option<&[ModuleEntry]> {
        self.previous_modules.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    fn position(&self, name: &str) -> Option<usize> {
        let key = normalize_key(name);
        self.modules.iter().position(|e| e.name == key)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn version_of(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.modules[idx].version.as_str())
    }

    fn snapshot(&mut self) {
        self.previous_modules = Some(self.modules.clone());
    }

    /// Pin `name` to `version`, appending the module if it is new.
    pub fn pin(&mut self, name: &str, version: &str) {
        self.snapshot();
        let entry = ModuleEntry::new(name, version);
        match self.position(&entry.name) {
            Some(idx) => self.modules[idx].version = entry.version,
            None => self.modules.push(entry),
        }
    }

    /// Remove `name`. Returns `false` (and leaves the snapshot alone) when it
    /// was not present.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(idx) = self.position(name) else {
            return false;
        };
        self.snapshot();
        self.modules.remove(idx);
        true
    }

    /// Move `module` so it installs immediately before `anchor`.
    ///
    /// Returns `false` when either module is missing or they are the same.
    pub fn place_before(&mut self, module: &str, anchor: &str) -> bool {
        let (Some(from), Some(_)) = (self.position(module), self.position(anchor)) else {
            return false;
        };
        if normalize_key(module) == normalize_key(anchor) {
            return false;
        }
        self.snapshot();
        let entry = self.modules.remove(from);
        // Anchor index may have shifted by the removal.
        let to = self.position(anchor).unwrap_or(self.modules.len());
        self.modules.insert(to, entry);
        true
    }

    /// Installer requirements in install order.
    pub fn requirements(&self) -> Vec<String> {
        self.modules.iter().map(ModuleEntry::requirement).collect()
    }
}
