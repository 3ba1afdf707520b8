#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;
use crate::sync::SyncConfig;

/// Environment variable overriding the default base directory
pub const HOME_ENV_VAR: &str = "RAGSYNC_HOME";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_secs: 60,
        }
    }
}

/// Defaults applied to similarity searches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub min_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.7,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 2 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid request timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid target chunk size: {0} (must be between 100 and 8000 characters)")]
    InvalidTargetChunkSize(usize),
    #[error("Overlap size ({0}) must be smaller than half the target chunk size ({1})")]
    InvalidOverlapSize(usize, usize),
    #[error("Invalid max chunk count: {0} (must be between 1 and 10000)")]
    InvalidMaxChunks(usize),
    #[error("Invalid max attempts: {0} (must be between 1 and 20)")]
    InvalidMaxAttempts(u32),
    #[error("Invalid backoff: initial {0}ms must be positive and not exceed max {1}ms")]
    InvalidBackoff(u64, u64),
    #[error("Invalid jitter ratio: {0} (must be between 0.0 and 1.0)")]
    InvalidJitterRatio(f64),
    #[error("Invalid concurrency limit: {0} (must be between 1 and 256)")]
    InvalidConcurrency(usize),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid min score: {0} (must be between -1.0 and 1.0)")]
    InvalidMinScore(f32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            ollama: OllamaConfig::default(),
            chunking: ChunkingConfig::default(),
            sync: SyncConfig::default(),
            search: SearchConfig::default(),
            base_dir: Self::default_base_dir().unwrap_or_else(|_| PathBuf::from(".ragsync")),
        }
    }
}

impl Config {
    /// Resolve the base directory: `$RAGSYNC_HOME`, falling back to `~/.ragsync`
    #[inline]
    pub fn default_base_dir() -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = env::var(HOME_ENV_VAR) {
            if !dir.trim().is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }

        dirs::home_dir()
            .map(|home| home.join(".ragsync"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load the configuration from the default base directory
    #[inline]
    pub fn load_default() -> Result<Self> {
        let base_dir = Self::default_base_dir().context("Failed to resolve base directory")?;
        Self::load(base_dir)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_chunking_config()?;
        self.validate_sync_config()?;
        self.validate_search_config()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(100..=8000).contains(&config.target_chunk_size) {
            return Err(ConfigError::InvalidTargetChunkSize(
                config.target_chunk_size,
            ));
        }

        // Windows must advance by at least half their size
        if config.overlap_size * 2 >= config.target_chunk_size {
            return Err(ConfigError::InvalidOverlapSize(
                config.overlap_size,
                config.target_chunk_size,
            ));
        }

        if !(1..=10_000).contains(&config.max_chunks) {
            return Err(ConfigError::InvalidMaxChunks(config.max_chunks));
        }

        Ok(())
    }

    fn validate_sync_config(&self) -> Result<(), ConfigError> {
        let config = &self.sync;

        if !(1..=20).contains(&config.max_attempts) {
            return Err(ConfigError::InvalidMaxAttempts(config.max_attempts));
        }

        if config.initial_backoff_ms == 0 || config.initial_backoff_ms > config.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.initial_backoff_ms,
                config.max_backoff_ms,
            ));
        }

        if !(0.0..=1.0).contains(&config.jitter_ratio) {
            return Err(ConfigError::InvalidJitterRatio(config.jitter_ratio));
        }

        if !(1..=600).contains(&config.embedding_timeout_secs) {
            return Err(ConfigError::InvalidTimeout(config.embedding_timeout_secs));
        }

        if !(1..=600).contains(&config.store_timeout_secs) {
            return Err(ConfigError::InvalidTimeout(config.store_timeout_secs));
        }

        if !(1..=256).contains(&config.max_concurrent_syncs) {
            return Err(ConfigError::InvalidConcurrency(config.max_concurrent_syncs));
        }

        Ok(())
    }

    fn validate_search_config(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.search.top_k) {
            return Err(ConfigError::InvalidTopK(self.search.top_k));
        }

        if !(-1.0..=1.0).contains(&self.search.min_score) {
            return Err(ConfigError::InvalidMinScore(self.search.min_score));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("metadata.db")
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(2..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if !(1..=600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }
}
