// Source management
// Applies chatbot, document and link mutations to SQLite, then hands the
// resulting chunk work to the sync coordinator


use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::database::sqlite::models::{
    Chatbot, ChatbotStatistics, Document, Link, NewChatbot, NewDocument, NewLink,
    SourceContentUpdate, SourceRecord, SyncStatus,
};
use crate::database::sqlite::Database;
use crate::database::{SearchFilters, SearchHit, SourceKey};
use crate::embeddings::EmbeddingBackend;
use crate::sync::consistency::ConsistencyValidator;
use crate::sync::{
    CleanupReport, SourceMetadata, StatusRecorder, SyncCoordinator, SyncHandle, SyncStatusUpdate,
};
use crate::SyncError;

/// Chatbot counters together with its chunk count in the vector store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatbotStatus {
    pub statistics: ChatbotStatistics,
    pub chunks: u64,
}

pub struct SourceService {
    database: Database,
    coordinator: SyncCoordinator,
    backend: Arc<dyn EmbeddingBackend>,
    search: SearchConfig,
}

impl SourceService {
    #[inline]
    pub fn new(
        database: Database,
        coordinator: SyncCoordinator,
        backend: Arc<dyn EmbeddingBackend>,
        search: SearchConfig,
    ) -> Self {
        Self {
            database,
            coordinator,
            backend,
            search,
        }
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    #[inline]
    pub fn validator(&self) -> ConsistencyValidator<'_> {
        ConsistencyValidator::new(&self.database, &self.coordinator)
    }

    // Chatbots

    #[inline]
    pub async fn add_chatbot(&self, tenant_id: i64, name: &str) -> Result<Chatbot> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("Chatbot name cannot be empty");
        }

        let chatbot = self
            .database
            .create_chatbot(NewChatbot {
                tenant_id,
                name: name.to_string(),
            })
            .await
            .with_context(|| format!("Failed to create chatbot '{}'", name))?;

        info!(
            "Created chatbot {} ({}) for tenant {}",
            chatbot.id, chatbot.name, tenant_id
        );
        Ok(chatbot)
    }

    #[inline]
    pub async fn list_chatbots(&self) -> Result<Vec<Chatbot>> {
        self.database.list_chatbots().await
    }

    /// Remove a chatbot's chunks and sessions, then the chatbot row and its sources.
    ///
    /// Returns `None` when the chatbot does not exist.
    #[inline]
    pub async fn delete_chatbot(&self, chatbot_id: i64) -> Result<Option<CleanupReport>> {
        let Some(chatbot) = self.database.get_chatbot(chatbot_id).await? else {
            return Ok(None);
        };

        let report = self
            .coordinator
            .cleanup_tenant_scope(chatbot.tenant_id, chatbot.id)
            .await
            .with_context(|| format!("Failed to clean up chatbot {}", chatbot.id))?;

        self.database.delete_chatbot(chatbot.id).await?;
        info!(
            "Deleted chatbot {} ({}): {} chunks, {} sessions",
            chatbot.id, chatbot.name, report.chunks_deleted, report.sessions_deleted
        );
        Ok(Some(report))
    }

    #[inline]
    pub async fn chatbot_status(&self, chatbot_id: i64) -> Result<Option<ChatbotStatus>> {
        let Some(statistics) = self.database.get_chatbot_statistics(chatbot_id).await? else {
            return Ok(None);
        };

        let chunks = self
            .coordinator
            .store()
            .count_by_chatbot(statistics.chatbot.tenant_id, chatbot_id)
            .await
            .context("Failed to count chatbot chunks")?;

        Ok(Some(ChatbotStatus { statistics, chunks }))
    }

    // Documents

    #[inline]
    pub async fn add_document(&self, new_document: NewDocument) -> Result<(Document, SyncHandle)> {
        self.ensure_chatbot(new_document.tenant_id, new_document.chatbot_id)
            .await?;

        let document = self
            .database
            .create_document(new_document)
            .await
            .context("Failed to create document")?;
        let handle = self.sync_source(SourceRecord::from(document.clone()));

        info!("Added document {} ({})", document.id, document.name);
        Ok((document, handle))
    }

    /// Update a document; a sync is started only when its content changed
    #[inline]
    pub async fn update_document(
        &self,
        id: i64,
        update: SourceContentUpdate,
    ) -> Result<Option<(Document, Option<SyncHandle>)>> {
        let Some((document, changed)) = self.database.update_document(id, update).await? else {
            return Ok(None);
        };

        let handle = if changed {
            Some(self.sync_source(SourceRecord::from(document.clone())))
        } else {
            debug!("Document {} content unchanged, skipping sync", id);
            None
        };
        Ok(Some((document, handle)))
    }

    /// Delete a document and its chunks, returning the chunk count removed
    #[inline]
    pub async fn delete_document(&self, id: i64) -> Result<Option<u64>> {
        let Some(document) = self.database.get_document(id).await? else {
            return Ok(None);
        };

        self.database.delete_document(id).await?;
        let key = SourceKey::document(document.tenant_id, document.id);
        let chunks = self
            .coordinator
            .delete_source(&key)
            .await
            .with_context(|| format!("Failed to delete chunks for {}", key))?;
        Ok(Some(chunks))
    }

    // Links

    #[inline]
    pub async fn add_link(&self, new_link: NewLink) -> Result<(Link, SyncHandle)> {
        self.ensure_chatbot(new_link.tenant_id, new_link.chatbot_id)
            .await?;
        url::Url::parse(&new_link.url)
            .with_context(|| format!("Invalid link URL: {}", new_link.url))?;

        let link = self
            .database
            .create_link(new_link)
            .await
            .context("Failed to create link")?;
        let handle = self.sync_source(SourceRecord::from(link.clone()));

        info!("Added link {} ({})", link.id, link.url);
        Ok((link, handle))
    }

    #[inline]
    pub async fn update_link(
        &self,
        id: i64,
        update: SourceContentUpdate,
    ) -> Result<Option<(Link, Option<SyncHandle>)>> {
        if let Some(url) = &update.label {
            url::Url::parse(url).with_context(|| format!("Invalid link URL: {}", url))?;
        }

        let Some((link, changed)) = self.database.update_link(id, update).await? else {
            return Ok(None);
        };

        let handle = if changed {
            Some(self.sync_source(SourceRecord::from(link.clone())))
        } else {
            debug!("Link {} content unchanged, skipping sync", id);
            None
        };
        Ok(Some((link, handle)))
    }

    #[inline]
    pub async fn delete_link(&self, id: i64) -> Result<Option<u64>> {
        let Some(link) = self.database.get_link(id).await? else {
            return Ok(None);
        };

        self.database.delete_link(id).await?;
        let key = SourceKey::link(link.tenant_id, link.id);
        let chunks = self
            .coordinator
            .delete_source(&key)
            .await
            .with_context(|| format!("Failed to delete chunks for {}", key))?;
        Ok(Some(chunks))
    }

    // Sync control

    /// Reset a source to pending and sync its stored content again
    #[inline]
    pub async fn retry(&self, key: &SourceKey) -> Result<SyncHandle> {
        let source = self
            .database
            .get_source(key)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("source {}", key)))?;

        if let Err(e) = self
            .database
            .record_status(key, &SyncStatusUpdate::pending())
            .await
        {
            warn!("Failed to reset status for {}: {}", key, e);
        }

        info!("Retrying sync for {} ({})", key, source.label);
        Ok(self.sync_source(source))
    }

    /// Sync every pending or failed source, optionally limited to one chatbot
    #[inline]
    pub async fn reconcile(&self, chatbot_id: Option<i64>) -> Result<Vec<SyncHandle>> {
        let mut sources = self
            .database
            .list_sources_by_status(SyncStatus::Pending)
            .await?;
        let errored = self
            .database
            .list_sources_by_status(SyncStatus::Error)
            .await?;
        sources.extend(errored);
        sources.sort_by_key(|source| source.key);

        let handles: Vec<SyncHandle> = sources
            .into_iter()
            .filter(|source| chatbot_id.is_none_or(|id| source.chatbot_id == id))
            .map(|source| self.sync_source(source))
            .collect();

        info!("Reconcile started {} syncs", handles.len());
        Ok(handles)
    }

    /// Similarity search over one chatbot's chunks
    #[inline]
    pub async fn search(
        &self,
        chatbot_id: i64,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let chatbot = self
            .database
            .get_chatbot(chatbot_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("chatbot {}", chatbot_id)))?;

        let query = query.trim();
        if query.is_empty() {
            anyhow::bail!("Search query cannot be empty");
        }

        let vectors = self
            .backend
            .embed(&[query.to_string()])
            .await
            .map_err(SyncError::from)
            .context("Failed to embed search query")?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding backend returned no vector for query"))?;

        let filters = SearchFilters::for_chatbot(chatbot.id).with_min_score(self.search.min_score);
        let hits = self
            .coordinator
            .store()
            .search(
                chatbot.tenant_id,
                &query_vector,
                top_k.unwrap_or(self.search.top_k),
                &filters,
            )
            .await
            .context("Vector search failed")?;

        debug!("Search in chatbot {} returned {} hits", chatbot.id, hits.len());
        Ok(hits)
    }

    fn sync_source(&self, source: SourceRecord) -> SyncHandle {
        self.coordinator.request_sync(
            source.key,
            source.content,
            SourceMetadata::new(source.chatbot_id, source.metadata),
        )
    }

    async fn ensure_chatbot(&self, tenant_id: i64, chatbot_id: i64) -> Result<()> {
        match self.database.get_chatbot(chatbot_id).await? {
            Some(chatbot) if chatbot.tenant_id == tenant_id => Ok(()),
            Some(chatbot) => anyhow::bail!(
                "Chatbot {} belongs to tenant {}, not {}",
                chatbot_id,
                chatbot.tenant_id,
                tenant_id
            ),
            None => Err(SyncError::NotFound(format!("chatbot {}", chatbot_id)).into()),
        }
    }
}
