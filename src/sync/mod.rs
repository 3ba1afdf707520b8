//! Sync coordinator.
//!
//! Keeps the chunk set of every source in the vector store in step with the
//! source's current content. Every `request_sync` or `delete_source` call for
//! a key takes a fresh generation number; only the holder of the latest
//! generation may write that key's chunks or status, and it does so under
//! the key's apply lock. Older requests keep running but their results are
//! discarded, so the last writer wins.

pub mod consistency;
mod retry;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::sqlite::models::SyncStatus;
use crate::database::{ChunkRecord, SourceKey, VectorStore};
use crate::embeddings::{ChunkedContent, ChunkingConfig, EmbeddingBackend, chunk_content};
use crate::{Result, SyncError};

pub use retry::BackoffPolicy;

/// Retry, timeout and concurrency settings for the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts per request, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Extra random delay as a fraction of the backoff
    pub jitter_ratio: f64,
    pub embedding_timeout_secs: u64,
    pub store_timeout_secs: u64,
    pub max_concurrent_syncs: usize,
}

impl Default for SyncConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            jitter_ratio: 0.2,
            embedding_timeout_secs: 120,
            store_timeout_secs: 30,
            max_concurrent_syncs: 8,
        }
    }
}

/// New values for a source's sync status columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatusUpdate {
    pub status: SyncStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// `None` keeps the stored attempt time
    pub attempted_at: Option<DateTime<Utc>>,
}

impl SyncStatusUpdate {
    #[inline]
    pub fn synced(at: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Synced,
            attempt_count: 0,
            last_error: None,
            attempted_at: Some(at),
        }
    }

    /// A transient failure that will be retried
    #[inline]
    pub fn retrying(attempts: u32, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Pending,
            attempt_count: attempts,
            last_error: Some(error.into()),
            attempted_at: Some(at),
        }
    }

    #[inline]
    pub fn failed(attempts: u32, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: SyncStatus::Error,
            attempt_count: attempts,
            last_error: Some(error.into()),
            attempted_at: Some(at),
        }
    }

    #[inline]
    pub fn pending() -> Self {
        Self {
            status: SyncStatus::Pending,
            attempt_count: 0,
            last_error: None,
            attempted_at: None,
        }
    }
}

/// Receives per-source sync status; failures are logged, never propagated
#[async_trait]
pub trait StatusRecorder: Send + Sync {
    async fn record_status(&self, key: &SourceKey, update: &SyncStatusUpdate) -> Result<()>;
}

/// Owner of chat sessions, cleared together with a chatbot's chunks
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn delete_sessions_for_chatbot(&self, tenant_id: i64, chatbot_id: i64) -> Result<u64>;
}

/// Source fields copied onto each chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub chatbot_id: i64,
    pub fields: serde_json::Value,
}

impl SourceMetadata {
    #[inline]
    pub fn new(chatbot_id: i64, fields: serde_json::Value) -> Self {
        Self { chatbot_id, fields }
    }
}

/// Final result of one `request_sync` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { chunks: u64, truncated: bool },
    Failed { attempts: u32, error: String },
    /// A newer request or a delete took over the key
    Superseded,
}

impl SyncOutcome {
    #[inline]
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. })
    }
}

/// Chunks and sessions removed by a chatbot cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub chunks_deleted: u64,
    pub sessions_deleted: u64,
}

/// Handle to a spawned sync
#[derive(Debug)]
pub struct SyncHandle {
    key: SourceKey,
    generation: u64,
    task: JoinHandle<SyncOutcome>,
}

impl SyncHandle {
    #[inline]
    pub fn key(&self) -> SourceKey {
        self.key
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the sync to finish
    #[inline]
    pub async fn wait(self) -> SyncOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Sync task for {} did not complete: {}", self.key, e);
                SyncOutcome::Failed {
                    attempts: 0,
                    error: format!("sync task did not complete: {}", e),
                }
            }
        }
    }
}

struct KeyState {
    latest: u64,
    chatbot_id: Option<i64>,
    apply_lock: Arc<AsyncMutex<()>>,
}

struct Shared {
    config: SyncConfig,
    chunking: ChunkingConfig,
    backoff: BackoffPolicy,
    backend: Arc<dyn EmbeddingBackend>,
    store: Arc<dyn VectorStore>,
    status: Arc<dyn StatusRecorder>,
    sessions: Arc<dyn SessionStore>,
    keys: Mutex<HashMap<SourceKey, KeyState>>,
    generations: AtomicU64,
    permits: Arc<Semaphore>,
}

/// Drives chunk, embed and replace for source keys
#[derive(Clone)]
pub struct SyncCoordinator {
    shared: Arc<Shared>,
}

impl SyncCoordinator {
    #[inline]
    pub fn new(
        config: &Config,
        backend: Arc<dyn EmbeddingBackend>,
        store: Arc<dyn VectorStore>,
        status: Arc<dyn StatusRecorder>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let sync = config.sync.clone();
        Self {
            shared: Arc::new(Shared {
                backoff: BackoffPolicy::from_config(&sync),
                permits: Arc::new(Semaphore::new(sync.max_concurrent_syncs.max(1))),
                config: sync,
                chunking: config.chunking.clone(),
                backend,
                store,
                status,
                sessions,
                keys: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    #[inline]
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.shared.store
    }

    /// Number of keys with a sync in flight
    #[inline]
    pub fn active_keys(&self) -> usize {
        self.shared.keys().map_or(0, |keys| keys.len())
    }

    /// Start syncing `content` into the chunk set for `key`.
    ///
    /// Supersedes any earlier request for the same key. Must be called from
    /// within a tokio runtime.
    #[inline]
    pub fn request_sync(
        &self,
        key: SourceKey,
        content: String,
        metadata: SourceMetadata,
    ) -> SyncHandle {
        let (generation, apply_lock) = self.shared.begin(key, Some(metadata.chatbot_id));
        debug!("Sync requested for {} (generation {})", key, generation);

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let outcome = shared
                .run_sync(key, generation, &apply_lock, &content, &metadata)
                .await;
            shared.finish(&key, generation);
            outcome
        });

        SyncHandle {
            key,
            generation,
            task,
        }
    }

    /// Remove every chunk for `key`, superseding any in-flight sync.
    ///
    /// Returns the number of chunks removed; 0 when the key has none. The
    /// source is left `pending` and its key released even if the store fails.
    #[inline]
    pub async fn delete_source(&self, key: &SourceKey) -> Result<u64> {
        let (generation, apply_lock) = self.shared.begin(*key, None);
        let _guard = apply_lock.lock().await;

        let result = self
            .shared
            .with_store_timeout(self.shared.store.delete_by_key(key))
            .await;
        self.shared.record(key, &SyncStatusUpdate::pending()).await;
        self.shared.finish(key, generation);

        let deleted =
            result.inspect_err(|e| error!("Failed to delete chunks for {}: {}", key, e))?;
        info!("Deleted {} chunks for {}", deleted, key);
        Ok(deleted)
    }

    /// Remove all sessions and chunks of one chatbot.
    ///
    /// On failure, sources whose sync was superseded are marked `pending`.
    #[inline]
    pub async fn cleanup_tenant_scope(
        &self,
        tenant_id: i64,
        chatbot_id: i64,
    ) -> Result<CleanupReport> {
        let claimed = self.shared.supersede_chatbot(tenant_id, chatbot_id)?;

        let mut guards = Vec::with_capacity(claimed.len());
        for (_, _, lock) in &claimed {
            guards.push(Arc::clone(lock).lock_owned().await);
        }

        // A failed cleanup must leave synced sources with their chunks
        let result = self.shared.clear_chatbot(tenant_id, chatbot_id).await;

        for (key, generation, _) in &claimed {
            if result.is_err() {
                self.shared.record(key, &SyncStatusUpdate::pending()).await;
            }
            self.shared.finish(key, *generation);
        }
        drop(guards);

        let (sessions_deleted, chunks_deleted) = result.inspect_err(|e| {
            error!(
                "Failed to clean up chatbot {} of tenant {}: {}",
                chatbot_id, tenant_id, e
            );
        })?;
        info!(
            "Cleaned up chatbot {} of tenant {}: {} chunks, {} sessions",
            chatbot_id, tenant_id, chunks_deleted, sessions_deleted
        );
        Ok(CleanupReport {
            chunks_deleted,
            sessions_deleted,
        })
    }
}

impl Shared {
    fn keys(&self) -> Result<MutexGuard<'_, HashMap<SourceKey, KeyState>>> {
        self.keys
            .lock()
            .map_err(|_| SyncError::Consistency("sync key table lock poisoned".to_string()))
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Claim the latest generation for `key`
    fn begin(&self, key: SourceKey, chatbot_id: Option<i64>) -> (u64, Arc<AsyncMutex<()>>) {
        let generation = self.next_generation();
        let mut keys = match self.keys.lock() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        let state = keys.entry(key).or_insert_with(|| KeyState {
            latest: generation,
            chatbot_id,
            apply_lock: Arc::new(AsyncMutex::new(())),
        });
        state.latest = generation;
        if chatbot_id.is_some() {
            state.chatbot_id = chatbot_id;
        }
        (generation, Arc::clone(&state.apply_lock))
    }

    fn is_current(&self, key: &SourceKey, generation: u64) -> bool {
        self.keys()
            .map(|keys| keys.get(key).is_some_and(|s| s.latest == generation))
            .unwrap_or(false)
    }

    /// Drop the key's state once its latest request is done
    fn finish(&self, key: &SourceKey, generation: u64) {
        if let Ok(mut keys) = self.keys() {
            if keys.get(key).is_some_and(|s| s.latest == generation) {
                keys.remove(key);
            }
        }
    }

    /// Bump the generation of every tracked key owned by the chatbot
    fn supersede_chatbot(
        &self,
        tenant_id: i64,
        chatbot_id: i64,
    ) -> Result<Vec<(SourceKey, u64, Arc<AsyncMutex<()>>)>> {
        let mut keys = self.keys()?;
        let mut claimed: Vec<_> = keys
            .iter_mut()
            .filter(|(key, state)| {
                key.tenant_id == tenant_id && state.chatbot_id == Some(chatbot_id)
            })
            .map(|(key, state)| {
                state.latest = self.next_generation();
                (*key, state.latest, Arc::clone(&state.apply_lock))
            })
            .collect();
        // Fixed lock order
        claimed.sort_by_key(|(key, _, _)| *key);
        Ok(claimed)
    }

    /// Delete a chatbot's sessions, then its chunks
    async fn clear_chatbot(&self, tenant_id: i64, chatbot_id: i64) -> Result<(u64, u64)> {
        let sessions_deleted = self
            .sessions
            .delete_sessions_for_chatbot(tenant_id, chatbot_id)
            .await?;
        let chunks_deleted = self
            .with_store_timeout(self.store.delete_by_chatbot(tenant_id, chatbot_id))
            .await?;
        Ok((sessions_deleted, chunks_deleted))
    }

    async fn record(&self, key: &SourceKey, update: &SyncStatusUpdate) {
        if let Err(e) = self.status.record_status(key, update).await {
            warn!(
                "Failed to record {} status for {}: {}",
                update.status, key, e
            );
        }
    }

    /// Record status only while `generation` still owns the key
    async fn record_if_current(
        &self,
        key: &SourceKey,
        generation: u64,
        apply_lock: &AsyncMutex<()>,
        update: &SyncStatusUpdate,
    ) -> bool {
        let _guard = apply_lock.lock().await;
        if !self.is_current(key, generation) {
            return false;
        }
        self.record(key, update).await;
        true
    }

    async fn with_store_timeout<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = Duration::from_secs(self.config.store_timeout_secs);
        tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| {
                SyncError::TransientBackend(format!(
                    "vector store did not respond within {}s",
                    limit.as_secs()
                ))
            })?
    }

    async fn run_sync(
        &self,
        key: SourceKey,
        generation: u64,
        apply_lock: &AsyncMutex<()>,
        content: &str,
        metadata: &SourceMetadata,
    ) -> SyncOutcome {
        let chunked = match chunk_content(content, &self.chunking) {
            Ok(chunked) => chunked,
            Err(e) => {
                let message = e.to_string();
                error!("Cannot sync {}: {}", key, message);
                let update = SyncStatusUpdate::failed(1, &message, Utc::now());
                if !self.record_if_current(&key, generation, apply_lock, &update).await {
                    return SyncOutcome::Superseded;
                }
                return SyncOutcome::Failed {
                    attempts: 1,
                    error: message,
                };
            }
        };

        let mut attempt = 0;
        loop {
            if !self.is_current(&key, generation) {
                debug!("Sync for {} (generation {}) superseded", key, generation);
                return SyncOutcome::Superseded;
            }
            attempt += 1;

            let result = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(_permit) => {
                    self.attempt(&key, generation, apply_lock, &chunked, metadata)
                        .await
                }
                Err(_) => Err(SyncError::TransientBackend(
                    "sync coordinator is shutting down".to_string(),
                )),
            };

            let error = match result {
                Ok(Some(chunks)) => {
                    info!(
                        "Synced {} chunks for {} on attempt {}",
                        chunks, key, attempt
                    );
                    return SyncOutcome::Synced {
                        chunks,
                        truncated: chunked.truncated,
                    };
                }
                Ok(None) => {
                    debug!("Sync for {} (generation {}) superseded", key, generation);
                    return SyncOutcome::Superseded;
                }
                Err(error) => error,
            };

            let message = error.to_string();
            let now = Utc::now();

            if error.is_retryable() && attempt < self.config.max_attempts {
                let delay = self.backoff.delay_for(attempt);
                warn!(
                    "Sync attempt {}/{} for {} failed: {}; retrying in {:?}",
                    attempt, self.config.max_attempts, key, message, delay
                );
                let update = SyncStatusUpdate::retrying(attempt, &message, now);
                if !self.record_if_current(&key, generation, apply_lock, &update).await {
                    return SyncOutcome::Superseded;
                }
                tokio::time::sleep(delay).await;
                continue;
            }

            error!(
                "Sync for {} failed after {} attempt(s): {}",
                key, attempt, message
            );
            let update = SyncStatusUpdate::failed(attempt, &message, now);
            if !self.record_if_current(&key, generation, apply_lock, &update).await {
                return SyncOutcome::Superseded;
            }
            return SyncOutcome::Failed {
                attempts: attempt,
                error: message,
            };
        }
    }

    /// One embed-and-replace pass; `Ok(None)` when superseded before applying
    async fn attempt(
        &self,
        key: &SourceKey,
        generation: u64,
        apply_lock: &AsyncMutex<()>,
        chunked: &ChunkedContent,
        metadata: &SourceMetadata,
    ) -> Result<Option<u64>> {
        let texts: Vec<String> = chunked.chunks.iter().map(|c| c.content.clone()).collect();

        let limit = Duration::from_secs(self.config.embedding_timeout_secs);
        let embeddings = tokio::time::timeout(limit, self.embed_all(&texts))
            .await
            .map_err(|_| {
                SyncError::TransientBackend(format!(
                    "embedding backend did not respond within {}s",
                    limit.as_secs()
                ))
            })??;

        let updated_at = Utc::now();
        let records: Vec<ChunkRecord> = chunked
            .chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let mut fields = metadata.fields.clone();
                if let Some(map) = fields.as_object_mut() {
                    map.insert("char_start".to_string(), chunk.char_start.into());
                    map.insert("char_end".to_string(), chunk.char_end.into());
                }
                ChunkRecord {
                    key: *key,
                    chatbot_id: metadata.chatbot_id,
                    chunk_index: chunk.chunk_index as u32,
                    text: chunk.content.clone(),
                    embedding,
                    metadata: fields,
                    updated_at,
                }
            })
            .collect();

        let _guard = apply_lock.lock().await;
        if !self.is_current(key, generation) {
            return Ok(None);
        }

        let stored = self
            .with_store_timeout(self.store.replace_chunks(key, records))
            .await?;
        self.record(key, &SyncStatusUpdate::synced(updated_at)).await;
        Ok(Some(stored))
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.backend.batch_size().max(1)) {
            let vectors = self.backend.embed(batch).await?;
            if vectors.len() != batch.len() {
                return Err(SyncError::PermanentContent(format!(
                    "embedding backend returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }
}
