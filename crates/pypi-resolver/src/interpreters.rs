//! Interpreter release table
//!
//! Known CPython release cycles with the date their first release shipped.
//! The table drives two things: the support-date window used to filter a
//! module's releases, and the symmetric window of interpreter versions the
//! coordinator explores in parallel.

use chrono::NaiveDate;
use tracing::debug;

/// One CPython release cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterRelease {
    /// Cycle identifier, e.g. `"3.8"`
    pub cycle: &'static str,
    /// First release date, `YYYY-MM-DD`
    pub released: &'static str,
}

impl InterpreterRelease {
    pub const fn new(cycle: &'static str, released: &'static str) -> Self {
        Self { cycle, released }
    }
}

/// Known interpreter cycles, oldest first.
///
/// Only cycles with published `python:<cycle>` images are listed.
pub const INTERPRETER_RELEASES: &[InterpreterRelease] = &[
    InterpreterRelease::new("2.7", "2010-07-03"),
    InterpreterRelease::new("3.3", "2012-09-29"),
    InterpreterRelease::new("3.4", "2014-03-16"),
    InterpreterRelease::new("3.5", "2015-09-13"),
    InterpreterRelease::new("3.6", "2016-12-23"),
    InterpreterRelease::new("3.7", "2018-06-27"),
    InterpreterRelease::new("3.8", "2019-10-14"),
    InterpreterRelease::new("3.9", "2020-10-05"),
    InterpreterRelease::new("3.10", "2021-10-04"),
    InterpreterRelease::new("3.11", "2022-10-24"),
    InterpreterRelease::new("3.12", "2023-10-02"),
    InterpreterRelease::new("3.13", "2024-10-07"),
];

/// Interpreter assumed when nothing better is known.
pub const FALLBACK_INTERPRETER: &str = "3.8";

/// Oldest supported interpreter; always present in the fallback window.
pub const LEGACY_INTERPRETER: &str = "2.7";

/// Release-date bounds for one interpreter: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SupportWindow {
    /// Whether `date` falls inside the half-open window.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

/// Normalize a loosely written interpreter version to a `major.minor` cycle.
///
/// `"3"` and `"3.x"` become `"3.7"`, `"3.8+"` becomes `"3.8"`, patch
/// components are dropped and a leading `python` prefix is ignored.
pub fn normalize_interpreter(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .replace('+', "");
    let mut parts = cleaned.split('.');
    let major = parts.next().unwrap_or_default();
    match parts.next() {
        None | Some("") => format!("{major}.7"),
        Some("x") | Some("X") | Some("*") => format!("{major}.7"),
        Some(minor) => format!("{major}.{minor}"),
    }
}

fn table_index(version: &str) -> Option<usize> {
    let cycle = normalize_interpreter(version);
    INTERPRETER_RELEASES.iter().position(|r| r.cycle == cycle)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// First release date of an interpreter cycle.
pub fn release_date(version: &str) -> Option<NaiveDate> {
    table_index(version).and_then(|idx| parse_date(INTERPRETER_RELEASES[idx].released))
}

/// Support-date window for `version`.
///
/// The window closes at the earliest known release that shipped after this
/// one (so 2.7 is bounded by 3.3, not by 3.0); the newest cycle is bounded
/// by `today`.
pub fn support_window(version: &str, today: NaiveDate) -> Option<SupportWindow> {
    let start = release_date(version)?;
    let end = INTERPRETER_RELEASES
        .iter()
        .filter_map(|r| parse_date(r.released))
        .filter(|d| *d > start)
        .min()
        .unwrap_or(today);
    Some(SupportWindow { start, end })
}

/// Symmetric window of `2w+1` interpreter cycles centred on `version`.
///
/// The window is shifted rather than truncated at either end of the table.
/// Returns `None` when `version` is not a known cycle.
pub fn candidate_window(version: &str, w: usize) -> Option<Vec<String>> {
    let idx = table_index(version)?;
    let len = INTERPRETER_RELEASES.len();
    let wanted = (2 * w + 1).min(len);

    let mut start = idx.saturating_sub(w);
    let mut end = (idx + w + 1).min(len);
    if end - start < wanted {
        if start == 0 {
            end = wanted;
        } else {
            start = end - wanted;
        }
    }

    Some(
        INTERPRETER_RELEASES[start..end]
            .iter()
            .map(|r| r.cycle.to_string())
            .collect(),
    )
}

/// Fixed window used when the inferred version is not in the table.
///
/// Centred on [`FALLBACK_INTERPRETER`] and always containing
/// [`LEGACY_INTERPRETER`].
pub fn fallback_window(w: usize) -> Vec<String> {
    let mut versions = vec![FALLBACK_INTERPRETER.to_string()];
    for i in 1..=w {
        if i == 1 {
            versions.push(LEGACY_INTERPRETER.to_string());
            versions.push(format!("3.{}", 8 + i));
        } else {
            versions.push(format!("3.{}", 8 + i));
            versions.push(format!("3.{}", 8 - i.min(8)));
        }
    }
    ensure_legacy(&mut versions);
    versions
}

fn ensure_legacy(versions: &mut Vec<String>) {
    if versions.iter().any(|v| v == LEGACY_INTERPRETER) {
        return;
    }
    match versions.last_mut() {
        Some(last) => *last = LEGACY_INTERPRETER.to_string(),
        None => versions.push(LEGACY_INTERPRETER.to_string()),
    }
}

/// Interpreter cycles to explore for an inferred `version`.
///
/// Uses [`candidate_window`] and falls back to [`fallback_window`] when the
/// lookup fails. With `include_legacy`, 2.7 replaces the last entry of a
/// window that lacks it.
pub fn interpreter_window(version: &str, w: usize, include_legacy: bool) -> Vec<String> {
    match candidate_window(version, w) {
        Some(mut versions) => {
            if include_legacy {
                ensure_legacy(&mut versions);
            }
            versions
        }
        None => {
            debug!(version, "interpreter not in release table, using fallback window");
            fallback_window(w)
        }
    }
}

/// Decode a wheel interpreter tag (`cp37` → `3.7`, `cp310` → `3.10`).
///
/// Tags that are not CPython ABI tags are returned unchanged.
pub fn decode_interpreter_tag(tag: &str) -> String {
    match tag.strip_prefix("cp") {
        Some(digits) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
            let (major, minor) = digits.split_at(1);
            if minor.is_empty() {
                major.to_string()
            } else {
                format!("{major}.{minor}")
            }
        }
        _ => tag.to_string(),
    }
}
