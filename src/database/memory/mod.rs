//! In-memory [`VectorStore`] for tests and ephemeral deployments.
//!
//! Each source key maps to one immutable `Arc<Vec<ChunkRecord>>`. A replace
//! builds the new set off-lock and swaps the `Arc` under a single write
//! lock, so readers always hold a complete chunk set. Search is brute-force
//! cosine similarity over the snapshot taken at query start.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::database::SourceKey;
use crate::database::vectors::{
    ChunkRecord, SearchFilters, SearchHit, VectorStore, cosine_similarity, rank_hits,
    validate_chunk_set,
};
use crate::{Result, SyncError};

type ChunkSet = Arc<Vec<ChunkRecord>>;

#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    sets: RwLock<HashMap<SourceKey, ChunkSet>>,
}

impl MemoryVectorStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<SourceKey, ChunkSet>>> {
        self.sets
            .read()
            .map_err(|_| SyncError::Database("vector store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<SourceKey, ChunkSet>>> {
        self.sets
            .write()
            .map_err(|_| SyncError::Database("vector store lock poisoned".to_string()))
    }

    /// Remove every set matching `predicate`, returning the chunk count removed
    fn remove_where<F>(&self, predicate: F) -> Result<u64>
    where
        F: Fn(&SourceKey, &ChunkSet) -> bool,
    {
        let mut sets = self.write()?;
        let mut removed = 0_u64;
        sets.retain(|key, set| {
            if predicate(key, set) {
                removed += set.len() as u64;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn replace_chunks(&self, key: &SourceKey, mut chunks: Vec<ChunkRecord>) -> Result<u64> {
        validate_chunk_set(key, &chunks)?;
        chunks.sort_by_key(|c| c.chunk_index);
        let count = chunks.len() as u64;

        let mut sets = self.write()?;
        if chunks.is_empty() {
            sets.remove(key);
        } else {
            sets.insert(*key, Arc::new(chunks));
        }
        drop(sets);

        debug!("Replaced chunk set for {} with {} chunks", key, count);
        Ok(count)
    }

    async fn delete_by_key(&self, key: &SourceKey) -> Result<u64> {
        let removed = self.write()?.remove(key);
        Ok(removed.map_or(0, |set| set.len() as u64))
    }

    async fn delete_by_tenant(&self, tenant_id: i64) -> Result<u64> {
        self.remove_where(|key, _| key.tenant_id == tenant_id)
    }

    async fn delete_by_chatbot(&self, tenant_id: i64, chatbot_id: i64) -> Result<u64> {
        self.remove_where(|key, set| {
            key.tenant_id == tenant_id && set.first().is_some_and(|c| c.chatbot_id == chatbot_id)
        })
    }

    async fn search(
        &self,
        tenant_id: i64,
        query_vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let snapshot: Vec<ChunkSet> = self
            .read()?
            .iter()
            .filter(|(key, _)| key.tenant_id == tenant_id)
            .map(|(_, set)| Arc::clone(set))
            .collect();

        let hits = snapshot
            .iter()
            .flat_map(|set| set.iter())
            .filter(|chunk| filters.matches(chunk))
            .filter_map(|chunk| {
                let score = cosine_similarity(query_vector, &chunk.embedding);
                filters.accepts_score(score).then(|| SearchHit {
                    chunk: chunk.clone(),
                    score,
                })
            })
            .collect();

        Ok(rank_hits(hits, top_k))
    }

    async fn chunks_for_key(&self, key: &SourceKey) -> Result<Vec<ChunkRecord>> {
        let set = self.read()?.get(key).map(Arc::clone);
        Ok(set.map(|s| s.as_ref().clone()).unwrap_or_default())
    }

    async fn count_by_key(&self, key: &SourceKey) -> Result<u64> {
        Ok(self.read()?.get(key).map_or(0, |set| set.len() as u64))
    }

    async fn count_by_chatbot(&self, tenant_id: i64, chatbot_id: i64) -> Result<u64> {
        Ok(self
            .read()?
            .iter()
            .filter(|(key, _)| key.tenant_id == tenant_id)
            .flat_map(|(_, set)| set.iter())
            .filter(|chunk| chunk.chatbot_id == chatbot_id)
            .count() as u64)
    }

    async fn source_chunk_counts(&self) -> Result<HashMap<SourceKey, u64>> {
        Ok(self
            .read()?
            .iter()
            .map(|(key, set)| (*key, set.len() as u64))
            .collect())
    }
}
