use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::SourceKey;
use crate::database::sqlite::models::{
    ChatSession, Chatbot, ChatbotStatistics, Document, Link, NewChatbot, NewDocument, NewLink,
    SourceContentUpdate, SourceRecord, SyncStatus,
};
use crate::database::sqlite::queries::{
    ChatbotQueries, DocumentQueries, LinkQueries, SessionQueries, SourceQueries,
};
use crate::sync::{SessionStore, StatusRecorder, SyncStatusUpdate};
use crate::SyncError;

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        let db_path = config_dir.join("metadata.db");
        let db_url = db_path.to_string_lossy();

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(db_url.as_ref()).await
    }

    // Chatbot operations
    #[inline]
    pub async fn create_chatbot(&self, new_chatbot: NewChatbot) -> Result<Chatbot> {
        ChatbotQueries::create(&self.pool, new_chatbot).await
    }

    #[inline]
    pub async fn get_chatbot(&self, id: i64) -> Result<Option<Chatbot>> {
        ChatbotQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn list_chatbots(&self) -> Result<Vec<Chatbot>> {
        ChatbotQueries::list_all(&self.pool).await
    }

    #[inline]
    pub async fn delete_chatbot(&self, id: i64) -> Result<bool> {
        ChatbotQueries::delete(&self.pool, id).await
    }

    #[inline]
    pub async fn get_chatbot_statistics(&self, id: i64) -> Result<Option<ChatbotStatistics>> {
        ChatbotQueries::get_statistics(&self.pool, id).await
    }

    // Document operations
    #[inline]
    pub async fn create_document(&self, new_document: NewDocument) -> Result<Document> {
        DocumentQueries::create(&self.pool, new_document).await
    }

    #[inline]
    pub async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        DocumentQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn update_document(
        &self,
        id: i64,
        update: SourceContentUpdate,
    ) -> Result<Option<(Document, bool)>> {
        DocumentQueries::update(&self.pool, id, update).await
    }

    #[inline]
    pub async fn delete_document(&self, id: i64) -> Result<bool> {
        DocumentQueries::delete(&self.pool, id).await
    }

    // Link operations
    #[inline]
    pub async fn create_link(&self, new_link: NewLink) -> Result<Link> {
        LinkQueries::create(&self.pool, new_link).await
    }

    #[inline]
    pub async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        LinkQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn update_link(
        &self,
        id: i64,
        update: SourceContentUpdate,
    ) -> Result<Option<(Link, bool)>> {
        LinkQueries::update(&self.pool, id, update).await
    }

    #[inline]
    pub async fn delete_link(&self, id: i64) -> Result<bool> {
        LinkQueries::delete(&self.pool, id).await
    }

    // Source operations
    #[inline]
    pub async fn get_source(&self, key: &SourceKey) -> Result<Option<SourceRecord>> {
        SourceQueries::get(&self.pool, key).await
    }

    #[inline]
    pub async fn list_sources(&self, chatbot_id: Option<i64>) -> Result<Vec<SourceRecord>> {
        SourceQueries::list(&self.pool, chatbot_id).await
    }

    #[inline]
    pub async fn list_sources_by_status(&self, status: SyncStatus) -> Result<Vec<SourceRecord>> {
        SourceQueries::list_by_status(&self.pool, status).await
    }

    // Session operations
    #[inline]
    pub async fn create_session(&self, tenant_id: i64, chatbot_id: i64) -> Result<ChatSession> {
        SessionQueries::create(&self.pool, tenant_id, chatbot_id).await
    }

    #[inline]
    pub async fn count_sessions(&self, tenant_id: i64, chatbot_id: i64) -> Result<i64> {
        SessionQueries::count_by_chatbot(&self.pool, tenant_id, chatbot_id).await
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}

#[async_trait]
impl StatusRecorder for Database {
    async fn record_status(&self, key: &SourceKey, update: &SyncStatusUpdate) -> crate::Result<()> {
        SourceQueries::update_sync_status(
            &self.pool,
            key,
            update.status,
            i64::from(update.attempt_count),
            update.last_error.as_deref(),
            update.attempted_at.map(|at| at.naive_utc()),
        )
        .await
        .map_err(|e| SyncError::Database(format!("{:#}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn delete_sessions_for_chatbot(
        &self,
        tenant_id: i64,
        chatbot_id: i64,
    ) -> crate::Result<u64> {
        SessionQueries::delete_by_chatbot(&self.pool, tenant_id, chatbot_id)
            .await
            .map_err(|e| SyncError::Database(format!("{:#}", e)))
    }
}
