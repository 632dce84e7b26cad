//! Ollama-backed oracle.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::error::{OracleError, OracleResult};
use super::request::OracleRequest;
use super::RepairOracle;

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default model tag
pub const DEFAULT_MODEL: &str = "phi3:medium";

/// Per-request limit; generations on a busy server can take minutes.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection settings for an Ollama server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
        }
    }
}

impl OllamaConfig {
    /// Defaults overridden by `PLLM_OLLAMA_URL` and `PLLM_MODEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("PLLM_OLLAMA_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("PLLM_MODEL") {
            config.model = model;
        }
        config
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Oracle that asks an Ollama model for JSON-formatted answers.
pub struct OllamaOracle {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaOracle {
    pub fn new(config: OllamaConfig) -> OracleResult<Self> {
        Self::with_timeout(config, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(config: OllamaConfig, timeout: Duration) -> OracleResult<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            config: OllamaConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            http_client,
        })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn generate_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.config.model,
            "prompt": prompt,
            "format": "json",
            "stream": false,
            "options": { "temperature": self.config.temperature },
        })
    }
}

#[async_trait]
impl RepairOracle for OllamaOracle {
    async fn propose(&self, request: &OracleRequest) -> OracleResult<Value> {
        let url = format!("{}/api/generate", self.config.base_url);
        debug!(task = ?request.task, model = %self.config.model, "querying oracle");

        let response = self
            .http_client
            .post(&url)
            .json(&self.generate_body(&request.prompt))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            return Err(OracleError::Http(format!("{url} returned {status}")));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
        serde_json::from_str(&body.response)
            .map_err(|e| OracleError::InvalidResponse(format!("model output is not JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "phi3:medium");
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_generate_body_requests_json() {
        let oracle = OllamaOracle::new(OllamaConfig {
            base_url: "http://ollama.invalid:11434/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(oracle.config().base_url, "http://ollama.invalid:11434");

        let body = oracle.generate_body("hello");
        assert_eq!(body["format"], "json");
        assert_eq!(body["stream"], false);
        assert_eq!(body["model"], "phi3:medium");
        assert_eq!(body["prompt"], "hello");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let oracle = OllamaOracle::new(OllamaConfig {
            base_url: "http://127.0.0.1:1".into(),
            ..Default::default()
        })
        .unwrap();
        let request = OracleRequest::new(
            crate::oracle::OracleTask::IdentifyModule,
            Default::default(),
        );
        let err = oracle.propose(&request).await.unwrap_err();
        assert!(matches!(err, OracleError::Unreachable(_)), "{err}");
    }

    #[tokio::test]
    async fn test_slow_generation_is_a_timeout() {
        // Accepts connections into the backlog but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let oracle = OllamaOracle::with_timeout(
            OllamaConfig {
                base_url: format!("http://{addr}"),
                ..Default::default()
            },
            Duration::from_millis(200),
        )
        .unwrap();
        let request = OracleRequest::new(
            crate::oracle::OracleTask::IdentifyModule,
            Default::default(),
        );
        let err = oracle.propose(&request).await.unwrap_err();
        assert!(matches!(err, OracleError::Timeout(_)), "{err}");
        drop(listener);
    }
}
