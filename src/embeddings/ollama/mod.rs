
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::embeddings::{EmbeddingBackend, EmbeddingBackendError};

/// Output size of the default `nomic-embed-text` model
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    embedding_dimension: usize,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.ollama.model.clone(),
            batch_size: config.ollama.batch_size,
            embedding_dimension: config.ollama.embedding_dimension as usize,
            agent: Self::build_agent(Duration::from_secs(config.ollama.timeout_secs)),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = Self::build_agent(timeout);
        self
    }

    fn build_agent(timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into()
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;

        if !models.iter().any(|m| m.name == self.model) {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            return Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available_models
            ));
        }

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Embed texts with blocking HTTP calls, one request per batch
    #[inline]
    pub fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingBackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.base_url.join("/api/embed").map_err(|e| {
            EmbeddingBackendError::Permanent(format!("Failed to build embedding URL: {}", e))
        })?;

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1) as usize) {
            embeddings.extend(self.embed_single_batch(&url, batch)?);
        }

        debug!("Generated {} embeddings total", embeddings.len());
        Ok(embeddings)
    }

    fn embed_single_batch(
        &self,
        url: &Url,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingBackendError> {
        let request = BatchEmbedRequest {
            model: &self.model,
            inputs: texts,
        };
        let request_json = serde_json::to_string(&request).map_err(|e| {
            EmbeddingBackendError::Permanent(format!("Failed to serialize request: {}", e))
        })?;

        debug!("Requesting {} embeddings from {}", texts.len(), url);

        let response_text = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(classify_error)?;

        let response: BatchEmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            EmbeddingBackendError::Permanent(format!("Malformed embedding response: {}", e))
        })?;

        if response.embeddings.len() != texts.len() {
            return Err(EmbeddingBackendError::Permanent(format!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        if let Some(bad) = response
            .embeddings
            .iter()
            .find(|e| e.len() != self.embedding_dimension)
        {
            return Err(EmbeddingBackendError::Permanent(format!(
                "Model {} returned {} dimensions, expected {}",
                self.model,
                bad.len(),
                self.embedding_dimension
            )));
        }

        Ok(response.embeddings)
    }
}

/// Server errors, throttling and transport failures can succeed on a later attempt
fn classify_error(error: ureq::Error) -> EmbeddingBackendError {
    match error {
        ureq::Error::StatusCode(status) if status >= 500 || status == 429 => {
            warn!("Ollama server error (status {})", status);
            EmbeddingBackendError::Transient(format!("HTTP {}", status))
        }
        ureq::Error::StatusCode(status) => {
            warn!("Ollama rejected request (status {})", status);
            EmbeddingBackendError::Permanent(format!("HTTP {}", status))
        }
        other => {
            warn!("Transport error talking to Ollama: {}", other);
            EmbeddingBackendError::Transient(other.to_string())
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingBackendError> {
        let client = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.embed_blocking(&texts))
            .await
            .map_err(|e| EmbeddingBackendError::Transient(format!("Embedding task failed: {}", e)))?
    }

    fn batch_size(&self) -> usize {
        self.batch_size.max(1) as usize
    }
}
