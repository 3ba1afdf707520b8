use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Transient backend error: {0}")]
    TransientBackend(String),

    #[error("Permanent content error: {0}")]
    PermanentContent(String),

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Whether a sync attempt that failed with this error may be retried
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Database(_)
                | SyncError::TransientBackend(_)
                | SyncError::Consistency(_)
        )
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod sources;
pub mod sync;
