//! Candidate release selection
//!
//! Given every release of a module and a target interpreter, keep the
//! releases that plausibly support it and order them with a numeric-aware
//! key so `1.2` sorts before `1.10`.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::cache::CandidateCache;
use crate::interpreters::{
    decode_interpreter_tag, normalize_interpreter, support_window, SupportWindow,
};
use crate::registry::{ReleaseIndex, ReleaseRegistry};

/// Releases kept through the `source` rule stop once this many are kept.
const SOURCE_RELEASE_LIMIT: usize = 20;

/// Modules with this many releases or fewer keep all of them.
const SMALL_MODULE_RELEASES: usize = 5;

/// One run of a version string: digits compare as integers, the rest as text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum VersionPart {
    Num(u64),
    Text(String),
}

/// Split a version into alternating digit / non-digit runs.
pub fn version_key(version: &str) -> Vec<VersionPart> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;

    for c in version.chars() {
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != in_digits {
            parts.push(finish_part(&current, in_digits));
            current.clear();
        }
        in_digits = is_digit;
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(finish_part(&current, in_digits));
    }
    parts
}

fn finish_part(run: &str, digits: bool) -> VersionPart {
    if digits {
        VersionPart::Num(run.parse().unwrap_or(u64::MAX))
    } else {
        VersionPart::Text(run.to_string())
    }
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    version_key(a).cmp(&version_key(b)).then_with(|| a.cmp(b))
}

/// Sort and de-duplicate versions under [`version_key`].
pub fn sort_versions(versions: &mut Vec<String>) {
    versions.sort_by(|a, b| compare_versions(a, b));
    versions.dedup();
}

fn tag_matches_major(tag: &str, interpreter: &str) -> bool {
    match interpreter.split('.').next() {
        Some("2") => tag.contains("py2"),
        Some("3") => tag.contains("py3"),
        _ => false,
    }
}

/// Filter a module's releases down to candidates for `interpreter`.
///
/// A release is kept when its first non-yanked file was uploaded inside
/// `window`, declares exactly `interpreter`, declares the matching coarse
/// `py2`/`py3` marker, or is a `source` upload while fewer than 20 releases
/// have been kept. Modules with five releases or fewer keep everything. If
/// nothing survives, the most recently uploaded release is returned alone.
pub fn select_candidates(
    releases: &ReleaseIndex,
    window: &SupportWindow,
    interpreter: &str,
) -> Vec<String> {
    let small_module = releases.len() <= SMALL_MODULE_RELEASES;

    let mut ordered: Vec<&String> = releases.keys().collect();
    ordered.sort_by(|a, b| compare_versions(a, b));

    let mut kept: Vec<String> = Vec::new();
    let mut latest: Option<(NaiveDate, &String)> = None;

    for version in ordered {
        let Some(file) = releases[version].iter().find(|f| !f.yanked) else {
            continue;
        };
        let uploaded = file.upload_date();
        let tag = file.python_version.as_str();

        let keep = small_module
            || uploaded.map(|d| window.contains(d)).unwrap_or(false)
            || decode_interpreter_tag(tag) == interpreter
            || tag_matches_major(tag, interpreter)
            || (tag.contains("source") && kept.len() < SOURCE_RELEASE_LIMIT);

        if let Some(date) = uploaded {
            if latest.map(|(d, _)| date >= d).unwrap_or(true) {
                latest = Some((date, version));
            }
        }

        if keep {
            kept.push(version.clone());
        }
    }

    if kept.is_empty() {
        if let Some((_, version)) = latest {
            kept.push(version.clone());
        }
    }

    sort_versions(&mut kept);
    kept
}

/// Version Candidate Resolver: registry query + filtering + cache.
pub struct CandidateResolver {
    registry: Arc<dyn ReleaseRegistry>,
    cache: CandidateCache,
}

impl CandidateResolver {
    pub fn new(registry: Arc<dyn ReleaseRegistry>, cache: CandidateCache) -> Self {
        Self { registry, cache }
    }

    pub fn cache(&self) -> &CandidateCache {
        &self.cache
    }

    /// Ordered candidate versions of `module` for `interpreter`.
    ///
    /// A cached list is returned without querying the registry. An empty
    /// result means "no informed guess" and is never cached.
    pub async fn resolve(&self, module: &str, interpreter: &str) -> Vec<String> {
        self.resolve_at(module, interpreter, Utc::now().date_naive())
            .await
    }

    /// [`resolve`](Self::resolve) with an explicit "today" for the newest
    /// interpreter's window.
    pub async fn resolve_at(
        &self,
        module: &str,
        interpreter: &str,
        today: NaiveDate,
    ) -> Vec<String> {
        let interpreter = normalize_interpreter(interpreter);

        match self.cache.load(module, &interpreter) {
            Ok(Some(cached)) => {
                debug!(module, %interpreter, "candidate cache hit");
                return cached;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(module, %interpreter, error = %e, "unreadable cache entry, re-resolving")
            }
        }

        let Some(window) = support_window(&interpreter, today) else {
            warn!(module, %interpreter, "interpreter not in release table");
            return Vec::new();
        };

        let releases = match self.registry.query_releases(module).await {
            Ok(releases) => releases,
            Err(e) => {
                warn!(module, error = %e, "release query failed");
                return Vec::new();
            }
        };

        let candidates = select_candidates(&releases, &window, &interpreter);
        info!(
            module,
            %interpreter,
            total = releases.len(),
            kept = candidates.len(),
            "resolved release candidates"
        );

        if !candidates.is_empty() {
            if let Err(e) = self.cache.store(module, &interpreter, &candidates) {
                warn!(module, error = %e, "failed to cache candidates");
            }
        }
        candidates
    }
}
