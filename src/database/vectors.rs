// Vector store interface shared by the LanceDB and in-memory backends

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::database::{SourceKey, SourceType};
use crate::{Result, SyncError};

/// One embedded slice of a source's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub key: SourceKey,
    pub chatbot_id: i64,
    pub chunk_index: u32,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Descriptive fields of the source (filename, url, title, ...)
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl ChunkRecord {
    #[inline]
    pub fn id(&self) -> String {
        self.key.chunk_id(self.chunk_index)
    }
}

/// Search result with cosine similarity score (higher is better)
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: ChunkRecord,
    pub score: f32,
}

/// Optional restrictions applied on top of the tenant scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub chatbot_id: Option<i64>,
    pub source_type: Option<SourceType>,
    pub min_score: Option<f32>,
}

impl SearchFilters {
    #[inline]
    pub fn for_chatbot(chatbot_id: i64) -> Self {
        Self {
            chatbot_id: Some(chatbot_id),
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    #[inline]
    pub fn matches(&self, chunk: &ChunkRecord) -> bool {
        self.chatbot_id.is_none_or(|id| chunk.chatbot_id == id)
            && self
                .source_type
                .is_none_or(|source_type| chunk.key.source_type == source_type)
    }

    #[inline]
    pub fn accepts_score(&self, score: f32) -> bool {
        self.min_score.is_none_or(|min| score >= min)
    }
}

/// Storage for chunk sets keyed by source.
///
/// `replace_chunks` must be atomic from a reader's point of view: a
/// concurrent `search` observes either the complete old chunk set or the
/// complete new one, never a mix and never an empty gap.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Swap the chunk set for `key`, returning the number of chunks stored
    async fn replace_chunks(&self, key: &SourceKey, chunks: Vec<ChunkRecord>) -> Result<u64>;

    async fn delete_by_key(&self, key: &SourceKey) -> Result<u64>;

    async fn delete_by_tenant(&self, tenant_id: i64) -> Result<u64>;

    async fn delete_by_chatbot(&self, tenant_id: i64, chatbot_id: i64) -> Result<u64>;

    /// Nearest neighbours within a tenant, best first
    async fn search(
        &self,
        tenant_id: i64,
        query_vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>>;

    /// Current chunk set for a key ordered by chunk index
    async fn chunks_for_key(&self, key: &SourceKey) -> Result<Vec<ChunkRecord>>;

    async fn count_by_key(&self, key: &SourceKey) -> Result<u64>;

    async fn count_by_chatbot(&self, tenant_id: i64, chatbot_id: i64) -> Result<u64>;

    /// Number of chunks stored per source key
    async fn source_chunk_counts(&self) -> Result<HashMap<SourceKey, u64>>;
}

/// Reject chunk sets that do not belong entirely to `key` or repeat an index
pub(crate) fn validate_chunk_set(key: &SourceKey, chunks: &[ChunkRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(chunks.len());
    for chunk in chunks {
        if chunk.key != *key {
            return Err(SyncError::Consistency(format!(
                "chunk {} does not belong to source {}",
                chunk.id(),
                key
            )));
        }
        if !seen.insert(chunk.chunk_index) {
            return Err(SyncError::Consistency(format!(
                "duplicate chunk index {} for source {}",
                chunk.chunk_index, key
            )));
        }
    }

    if let Some(first) = chunks.first() {
        let dimension = first.embedding.len();
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dimension) {
            return Err(SyncError::Consistency(format!(
                "chunk {} has {} dimensions, expected {}",
                bad.id(),
                bad.embedding.len(),
                dimension
            )));
        }
    }

    Ok(())
}

/// Cosine similarity, 0.0 for empty or mismatched vectors
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Order hits by score, then most recent update, then lowest chunk index
pub(crate) fn rank_hits(mut hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.chunk.updated_at.cmp(&a.chunk.updated_at))
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
    hits.truncate(top_k);
    hits
}
