//! Package index client
//!
//! The resolver only needs one query from the index: every release of a
//! project together with its uploaded files. [`ReleaseRegistry`] is that
//! contract; [`PypiClient`] implements it against the PyPI JSON API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::Result;

/// Default package index endpoint
pub const PYPI_BASE_URL: &str = "https://pypi.org/pypi";

/// One uploaded file of a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFile {
    /// ISO timestamp of the upload, e.g. `2019-04-02T10:11:12`
    #[serde(default)]
    pub upload_time: String,
    /// Whether the release was yanked
    #[serde(default)]
    pub yanked: bool,
    /// Interpreter tag: `cp37`, `py3`, `py2.py3`, `source`, ...
    #[serde(default)]
    pub python_version: String,
}

impl ReleaseFile {
    pub fn new(upload_time: &str, python_version: &str) -> Self {
        Self {
            upload_time: upload_time.to_string(),
            yanked: false,
            python_version: python_version.to_string(),
        }
    }

    /// Mark the file as yanked
    pub fn yanked(mut self) -> Self {
        self.yanked = true;
        self
    }

    /// Calendar date of the upload
    pub fn upload_date(&self) -> Option<NaiveDate> {
        let day = self.upload_time.split('T').next()?;
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }
}

/// Release version → uploaded files
pub type ReleaseIndex = BTreeMap<String, Vec<ReleaseFile>>;

/// Query contract for a package index.
#[async_trait]
pub trait ReleaseRegistry: Send + Sync {
    /// All releases of `module`, yanked ones included.
    async fn query_releases(&self, module: &str) -> Result<ReleaseIndex>;
}

#[derive(Deserialize)]
struct ProjectDocument {
    #[serde(default)]
    releases: ReleaseIndex,
}

/// HTTP client for the PyPI JSON API
pub struct PypiClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl PypiClient {
    /// Create a client for the index at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("pllm-pypi-resolver/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(PypiClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Client for the public PyPI index
    pub fn public() -> Result<Self> {
        Self::new(PYPI_BASE_URL)
    }
}

#[async_trait]
impl ReleaseRegistry for PypiClient {
    async fn query_releases(&self, module: &str) -> Result<ReleaseIndex> {
        let url = format!("{}/{}/json", self.base_url, module);
        debug!(%url, "querying package index");

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::UnknownModule(module.to_string()));
        }
        if !status.is_success() {
            warn!(module, %status, "package index returned an error status");
            return Err(RegistryError::Http(format!("{} returned {}", url, status)));
        }

        let body = response.bytes().await?;
        let document: ProjectDocument = serde_json::from_slice(&body)?;
        Ok(document.releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_date_parses_iso_timestamp() {
        let file = ReleaseFile::new("2019-04-02T10:11:12", "py3");
        assert_eq!(
            file.upload_date(),
            NaiveDate::from_ymd_opt(2019, 4, 2)
        );
        assert!(ReleaseFile::new("", "py3").upload_date().is_none());
    }

    #[test]
    fn test_project_document_ignores_unknown_fields() {
        let json = r#"{
            "info": {"name": "requests"},
            "releases": {
                "2.0.0": [{"upload_time": "2013-09-24T17:00:00", "yanked": false, "python_version": "2.7", "size": 10}],
                "0.1": []
            }
        }"#;
        let doc: ProjectDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.releases.len(), 2);
        assert_eq!(doc.releases["2.0.0"][0].python_version, "2.7");
        assert!(doc.releases["0.1"].is_empty());
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = PypiClient::new("https://example.invalid/pypi/").unwrap();
        assert_eq!(client.base_url, "https://example.invalid/pypi");
    }
}
