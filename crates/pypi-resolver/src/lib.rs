//! PyPI Resolver: release candidates for a module under a target interpreter
//!
//! This crate answers one question for the repair loop: which published
//! releases of a module are plausible for a given Python version? It combines
//! a static interpreter release table, the package index's release metadata
//! and an on-disk cache keyed by `(module, interpreter)`.
//!
//! Failures never escape [`CandidateResolver::resolve`]: an unreachable index
//! or unknown module yields an empty list, meaning "no informed guess".

pub mod cache;
pub mod candidates;
pub mod error;
pub mod fakes;
pub mod interpreters;
pub mod registry;

pub use cache::CandidateCache;
pub use candidates::{select_candidates, sort_versions, version_key, CandidateResolver, VersionPart};
pub use error::RegistryError;
pub use interpreters::{
    candidate_window, decode_interpreter_tag, fallback_window, interpreter_window,
    normalize_interpreter, release_date, support_window, InterpreterRelease, SupportWindow,
    FALLBACK_INTERPRETER, INTERPRETER_RELEASES, LEGACY_INTERPRETER,
};
pub use registry::{PypiClient, ReleaseFile, ReleaseIndex, ReleaseRegistry, PYPI_BASE_URL};

/// Result type for resolver operations
pub type Result<T> = std::result::Result<T, RegistryError>;
