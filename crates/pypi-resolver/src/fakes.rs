//! In-memory registry fake (testing only)
//!
//! `StaticRegistry` serves a fixed release index per module and counts
//! queries, so cache behaviour can be asserted without network access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::registry::{ReleaseFile, ReleaseIndex, ReleaseRegistry};
use crate::Result;

/// Registry answering from a fixed map; unknown modules are `UnknownModule`.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    modules: HashMap<String, ReleaseIndex>,
    queries: AtomicUsize,
    offline: bool,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose every query fails as unreachable.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// Add a module whose releases all share one upload date and tag.
    pub fn with_module(mut self, module: &str, versions: &[(&str, &str, &str)]) -> Self {
        let index = versions
            .iter()
            .map(|(version, uploaded, tag)| {
                (version.to_string(), vec![ReleaseFile::new(uploaded, tag)])
            })
            .collect();
        self.modules.insert(module.to_string(), index);
        self
    }

    /// Number of `query_releases` calls served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseRegistry for StaticRegistry {
    async fn query_releases(&self, module: &str) -> Result<ReleaseIndex> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.offline {
            return Err(RegistryError::Unreachable("offline".to_string()));
        }
        self.modules
            .get(module)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownModule(module.to_string()))
    }
}
