
use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::database::{SourceKey, SourceType};

const DOCUMENT_COLUMNS: &str = "id, tenant_id, chatbot_id, name, file_type, file_size, content, \
     content_hash, sync_status, attempt_count, last_attempt_at, last_error, created_date, updated_date";

const LINK_COLUMNS: &str = "id, tenant_id, chatbot_id, url, title, content, content_hash, \
     sync_status, attempt_count, last_attempt_at, last_error, created_date, updated_date";

pub struct ChatbotQueries;

impl ChatbotQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_chatbot: NewChatbot) -> Result<Chatbot> {
        let now = Utc::now().naive_utc();
        let id =
            sqlx::query("INSERT INTO chatbots (tenant_id, name, created_date) VALUES (?, ?, ?)")
                .bind(new_chatbot.tenant_id)
                .bind(&new_chatbot.name)
                .bind(now)
                .execute(pool)
                .await
                .context("Failed to create chatbot")?
                .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created chatbot"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Chatbot>> {
        let result = sqlx::query_as::<_, Chatbot>(
            "SELECT id, tenant_id, name, created_date FROM chatbots WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get chatbot by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Chatbot>> {
        let chatbots = sqlx::query_as::<_, Chatbot>(
            "SELECT id, tenant_id, name, created_date FROM chatbots ORDER BY tenant_id, id",
        )
        .fetch_all(pool)
        .await
        .context("Failed to list chatbots")?;

        Ok(chatbots)
    }

    /// Delete a chatbot; its documents, links and sessions cascade
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chatbots WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete chatbot")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn get_statistics(pool: &SqlitePool, id: i64) -> Result<Option<ChatbotStatistics>> {
        let Some(chatbot) = Self::get_by_id(pool, id).await? else {
            return Ok(None);
        };

        let (documents, links, pending, synced, failed): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COALESCE(SUM(CASE WHEN source_type = 'document' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN source_type = 'link' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN sync_status = 'pending' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN sync_status = 'synced' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN sync_status = 'error' THEN 1 ELSE 0 END), 0)
                FROM (
                    SELECT 'document' AS source_type, sync_status FROM documents WHERE chatbot_id = ?
                    UNION ALL
                    SELECT 'link' AS source_type, sync_status FROM links WHERE chatbot_id = ?
                )
                "#,
            )
            .bind(id)
            .bind(id)
            .fetch_one(pool)
            .await
            .context("Failed to get chatbot source statistics")?;

        let sessions = SessionQueries::count_by_chatbot(pool, chatbot.tenant_id, id).await?;

        Ok(Some(ChatbotStatistics {
            chatbot,
            documents,
            links,
            pending_sources: pending,
            synced_sources: synced,
            failed_sources: failed,
            sessions,
        }))
    }
}

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_document: NewDocument) -> Result<Document> {
        let now = Utc::now().naive_utc();
        let hash = content_hash(&new_document.content);
        let id = sqlx::query(
            r#"
            INSERT INTO documents
                (tenant_id, chatbot_id, name, file_type, file_size, content, content_hash,
                 sync_status, created_date, updated_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(new_document.tenant_id)
        .bind(new_document.chatbot_id)
        .bind(&new_document.name)
        .bind(&new_document.file_type)
        .bind(new_document.content.len() as i64)
        .bind(&new_document.content)
        .bind(&hash)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create document")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created document"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Document>> {
        let result = sqlx::query_as::<_, Document>(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get document by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_by_chatbot(pool: &SqlitePool, chatbot_id: i64) -> Result<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(&format!(
            "SELECT {} FROM documents WHERE chatbot_id = ? ORDER BY id",
            DOCUMENT_COLUMNS
        ))
        .bind(chatbot_id)
        .fetch_all(pool)
        .await
        .context("Failed to list documents for chatbot")?;

        Ok(documents)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(&format!(
            "SELECT {} FROM documents ORDER BY id",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .context("Failed to list documents")?;

        Ok(documents)
    }

    /// Apply an update, returning the stored row and whether its content changed
    #[inline]
    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        update: SourceContentUpdate,
    ) -> Result<Option<(Document, bool)>> {
        let Some(current) = Self::get_by_id(pool, id).await? else {
            return Ok(None);
        };

        let name = update.label.unwrap_or(current.name);
        let file_type = current.file_type;
        let content = update.content.unwrap_or(current.content);
        let hash = content_hash(&content);
        let changed = hash != current.content_hash;
        let now = Utc::now().naive_utc();

        if changed {
            sqlx::query(
                r#"
                UPDATE documents
                SET name = ?, file_type = ?, file_size = ?, content = ?, content_hash = ?,
                    sync_status = 'pending', attempt_count = 0, last_error = NULL, updated_date = ?
                WHERE id = ?
                "#,
            )
            .bind(&name)
            .bind(&file_type)
            .bind(content.len() as i64)
            .bind(&content)
            .bind(&hash)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update document")?;
        } else {
            sqlx::query(
                "UPDATE documents SET name = ?, file_type = ?, updated_date = ? WHERE id = ?",
            )
            .bind(&name)
            .bind(&file_type)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update document")?;
        }

        let document = Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Document {} disappeared during update", id))?;
        Ok(Some((document, changed)))
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct LinkQueries;

impl LinkQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_link: NewLink) -> Result<Link> {
        let now = Utc::now().naive_utc();
        let hash = content_hash(&new_link.content);
        let id = sqlx::query(
            r#"
            INSERT INTO links
                (tenant_id, chatbot_id, url, title, content, content_hash,
                 sync_status, created_date, updated_date)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(new_link.tenant_id)
        .bind(new_link.chatbot_id)
        .bind(&new_link.url)
        .bind(&new_link.title)
        .bind(&new_link.content)
        .bind(&hash)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create link")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created link"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Link>> {
        let result = sqlx::query_as::<_, Link>(&format!(
            "SELECT {} FROM links WHERE id = ?",
            LINK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get link by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_by_chatbot(pool: &SqlitePool, chatbot_id: i64) -> Result<Vec<Link>> {
        let links = sqlx::query_as::<_, Link>(&format!(
            "SELECT {} FROM links WHERE chatbot_id = ? ORDER BY id",
            LINK_COLUMNS
        ))
        .bind(chatbot_id)
        .fetch_all(pool)
        .await
        .context("Failed to list links for chatbot")?;

        Ok(links)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Link>> {
        let links = sqlx::query_as::<_, Link>(&format!(
            "SELECT {} FROM links ORDER BY id",
            LINK_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .context("Failed to list links")?;

        Ok(links)
    }

    /// Apply an update, returning the stored row and whether its content changed
    #[inline]
    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        update: SourceContentUpdate,
    ) -> Result<Option<(Link, bool)>> {
        let Some(current) = Self::get_by_id(pool, id).await? else {
            return Ok(None);
        };

        let url = update.label.unwrap_or(current.url);
        let title = update.title.or(current.title);
        let content = update.content.unwrap_or(current.content);
        let hash = content_hash(&content);
        let changed = hash != current.content_hash;
        let now = Utc::now().naive_utc();

        if changed {
            sqlx::query(
                r#"
                UPDATE links
                SET url = ?, title = ?, content = ?, content_hash = ?,
                    sync_status = 'pending', attempt_count = 0, last_error = NULL, updated_date = ?
                WHERE id = ?
                "#,
            )
            .bind(&url)
            .bind(&title)
            .bind(&content)
            .bind(&hash)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update link")?;
        } else {
            sqlx::query("UPDATE links SET url = ?, title = ?, updated_date = ? WHERE id = ?")
                .bind(&url)
                .bind(&title)
                .bind(now)
                .bind(id)
                .execute(pool)
                .await
                .context("Failed to update link")?;
        }

        let link = Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Link {} disappeared during update", id))?;
        Ok(Some((link, changed)))
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM links WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete link")?;

        Ok(result.rows_affected() > 0)
    }
}

/// Queries shared by documents and links, addressed by source key
pub struct SourceQueries;

impl SourceQueries {
    #[inline]
    pub async fn get(pool: &SqlitePool, key: &SourceKey) -> Result<Option<SourceRecord>> {
        let record = match key.source_type {
            SourceType::Document => DocumentQueries::get_by_id(pool, key.source_id)
                .await?
                .filter(|d| d.tenant_id == key.tenant_id)
                .map(SourceRecord::from),
            SourceType::Link => LinkQueries::get_by_id(pool, key.source_id)
                .await?
                .filter(|l| l.tenant_id == key.tenant_id)
                .map(SourceRecord::from),
        };
        Ok(record)
    }

    /// Every document and link, optionally restricted to one chatbot
    #[inline]
    pub async fn list(pool: &SqlitePool, chatbot_id: Option<i64>) -> Result<Vec<SourceRecord>> {
        let (documents, links) = match chatbot_id {
            Some(id) => (
                DocumentQueries::list_by_chatbot(pool, id).await?,
                LinkQueries::list_by_chatbot(pool, id).await?,
            ),
            None => (
                DocumentQueries::list_all(pool).await?,
                LinkQueries::list_all(pool).await?,
            ),
        };

        Ok(documents
            .into_iter()
            .map(SourceRecord::from)
            .chain(links.into_iter().map(SourceRecord::from))
            .collect())
    }

    #[inline]
    pub async fn list_by_status(
        pool: &SqlitePool,
        status: SyncStatus,
    ) -> Result<Vec<SourceRecord>> {
        let documents = sqlx::query_as::<_, Document>(&format!(
            "SELECT {} FROM documents WHERE sync_status = ? ORDER BY id",
            DOCUMENT_COLUMNS
        ))
        .bind(status)
        .fetch_all(pool)
        .await
        .context("Failed to list documents by status")?;

        let links = sqlx::query_as::<_, Link>(&format!(
            "SELECT {} FROM links WHERE sync_status = ? ORDER BY id",
            LINK_COLUMNS
        ))
        .bind(status)
        .fetch_all(pool)
        .await
        .context("Failed to list links by status")?;

        Ok(documents
            .into_iter()
            .map(SourceRecord::from)
            .chain(links.into_iter().map(SourceRecord::from))
            .collect())
    }

    /// Write sync status columns; returns the number of rows touched
    #[inline]
    pub async fn update_sync_status(
        pool: &SqlitePool,
        key: &SourceKey,
        status: SyncStatus,
        attempt_count: i64,
        last_error: Option<&str>,
        attempted_at: Option<NaiveDateTime>,
    ) -> Result<u64> {
        let sql = format!(
            r#"
            UPDATE {}
            SET sync_status = ?, attempt_count = ?, last_error = ?,
                last_attempt_at = COALESCE(?, last_attempt_at)
            WHERE id = ? AND tenant_id = ?
            "#,
            key.source_type.table_name()
        );

        let result = sqlx::query(&sql)
            .bind(status)
            .bind(attempt_count)
            .bind(last_error)
            .bind(attempted_at)
            .bind(key.source_id)
            .bind(key.tenant_id)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to update sync status for {}", key))?;

        debug!(
            "Sync status for {} set to {} ({} rows)",
            key,
            status,
            result.rows_affected()
        );
        Ok(result.rows_affected())
    }
}

pub struct SessionQueries;

impl SessionQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, tenant_id: i64, chatbot_id: i64) -> Result<ChatSession> {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO chat_sessions (session_id, tenant_id, chatbot_id, history, last_activity) VALUES (?, ?, ?, '[]', ?)",
        )
        .bind(&session_id)
        .bind(tenant_id)
        .bind(chatbot_id)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create chat session")?;

        Self::get_by_id(pool, &session_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created chat session"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, session_id: &str) -> Result<Option<ChatSession>> {
        let result = sqlx::query_as::<_, ChatSession>(
            "SELECT session_id, tenant_id, chatbot_id, history, last_activity FROM chat_sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get chat session")?;

        Ok(result)
    }

    /// Replace the stored history and bump the activity timestamp
    #[inline]
    pub async fn update_history(
        pool: &SqlitePool,
        session_id: &str,
        history: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET history = ?, last_activity = ? WHERE session_id = ?",
        )
        .bind(history.to_string())
        .bind(Utc::now().naive_utc())
        .bind(session_id)
        .execute(pool)
        .await
        .context("Failed to update chat session history")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn count_by_chatbot(
        pool: &SqlitePool,
        tenant_id: i64,
        chatbot_id: i64,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_sessions WHERE tenant_id = ? AND chatbot_id = ?",
        )
        .bind(tenant_id)
        .bind(chatbot_id)
        .fetch_one(pool)
        .await
        .context("Failed to count chat sessions")?;

        Ok(count)
    }

    #[inline]
    pub async fn delete_by_chatbot(
        pool: &SqlitePool,
        tenant_id: i64,
        chatbot_id: i64,
    ) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM chat_sessions WHERE tenant_id = ? AND chatbot_id = ?")
                .bind(tenant_id)
                .bind(chatbot_id)
                .execute(pool)
                .await
                .context("Failed to delete chat sessions")?;

        Ok(result.rows_affected())
    }
}
