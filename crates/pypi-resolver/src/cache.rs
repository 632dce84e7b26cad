use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::Result;

/// Filesystem cache of resolved candidate lists.
///
/// Layout: `<root>/<module>_<interpreter>.txt`, one comma-separated list per
/// file. Each `(module, interpreter)` pair owns its own file, so writers for
/// different pairs never touch the same path.
#[derive(Debug, Clone)]
pub struct CandidateCache {
    root: PathBuf,
}

impl CandidateCache {
    /// Create a cache rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, module: &str, interpreter: &str) -> PathBuf {
        let safe: String = module
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{}_{}.txt", safe, interpreter))
    }

    /// Cached candidates, or `None` if this pair was never stored.
    pub fn load(&self, module: &str, interpreter: &str) -> Result<Option<Vec<String>>> {
        let path = self.entry_path(module, interpreter);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(
                content
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist candidates for a pair, replacing any previous entry.
    pub fn store(&self, module: &str, interpreter: &str, versions: &[String]) -> Result<()> {
        let path = self.entry_path(module, interpreter);

        // Write to a sibling temp file and rename so readers never see a partial list.
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(versions.join(", ").as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;

        debug!(module, interpreter, count = versions.len(), "cached candidates");
        Ok(())
    }
}
