// Embeddings module
// Content chunking and the embedding backend used by the sync coordinator

pub mod chunking;
pub mod ollama;

use async_trait::async_trait;
use thiserror::Error;

use crate::SyncError;

pub use chunking::{
    ChunkedContent, ChunkingConfig, ContentChunk, chunk_content, estimate_token_count,
};
pub use ollama::OllamaClient;

/// Failure reported by an embedding backend, split by whether retrying can help
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingBackendError {
    #[error("embedding backend unavailable: {0}")]
    Transient(String),
    #[error("embedding request rejected: {0}")]
    Permanent(String),
}

impl From<EmbeddingBackendError> for SyncError {
    #[inline]
    fn from(error: EmbeddingBackendError) -> Self {
        match error {
            EmbeddingBackendError::Transient(msg) => SyncError::TransientBackend(msg),
            EmbeddingBackendError::Permanent(msg) => SyncError::PermanentContent(msg),
        }
    }
}

/// Turns chunk texts into vectors
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed `texts`, returning one vector per input in the same order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingBackendError>;

    /// Largest number of texts sent in one `embed` call
    fn batch_size(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_to_sync_errors() {
        let transient: SyncError = EmbeddingBackendError::Transient("503".to_string()).into();
        assert!(matches!(transient, SyncError::TransientBackend(_)));
        assert!(transient.is_retryable());

        let permanent: SyncError = EmbeddingBackendError::Permanent("400".to_string()).into();
        assert!(matches!(permanent, SyncError::PermanentContent(_)));
        assert!(!permanent.is_retryable());
    }
}
