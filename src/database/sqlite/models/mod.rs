
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, Type};

use crate::database::{SourceKey, SourceType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Chatbot {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChatbot {
    pub tenant_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Error,
}

impl std::fmt::Display for SyncStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SyncStatus::Pending => write!(f, "Pending"),
            SyncStatus::Synced => write!(f, "Synced"),
            SyncStatus::Error => write!(f, "Error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub tenant_id: i64,
    pub chatbot_id: i64,
    pub name: String,
    pub file_type: Option<String>,
    pub file_size: i64,
    pub content: String,
    pub content_hash: String,
    pub sync_status: SyncStatus,
    pub attempt_count: i64,
    pub last_attempt_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub created_date: NaiveDateTime,
    pub updated_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub tenant_id: i64,
    pub chatbot_id: i64,
    pub name: String,
    pub file_type: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub id: i64,
    pub tenant_id: i64,
    pub chatbot_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub sync_status: SyncStatus,
    pub attempt_count: i64,
    pub last_attempt_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub created_date: NaiveDateTime,
    pub updated_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLink {
    pub tenant_id: i64,
    pub chatbot_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub content: String,
}

/// Changes to a source's descriptive fields and content; `None` keeps the stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceContentUpdate {
    /// Document filename or link url
    pub label: Option<String>,
    /// Link title; ignored for documents
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChatSession {
    pub session_id: String,
    pub tenant_id: i64,
    pub chatbot_id: i64,
    /// JSON array of conversation turns
    pub history: String,
    pub last_activity: NaiveDateTime,
}

/// Document or link viewed through its source key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub key: SourceKey,
    pub chatbot_id: i64,
    /// Document filename or link url
    pub label: String,
    pub content: String,
    pub content_hash: String,
    pub sync_status: SyncStatus,
    pub attempt_count: i64,
    pub last_attempt_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    /// Descriptive fields copied onto every chunk
    pub metadata: serde_json::Value,
}

impl From<Document> for SourceRecord {
    #[inline]
    fn from(doc: Document) -> Self {
        let metadata = serde_json::json!({
            "source_type": SourceType::Document,
            "filename": doc.name,
            "file_type": doc.file_type,
            "file_size": doc.file_size,
        });
        Self {
            key: SourceKey::document(doc.tenant_id, doc.id),
            chatbot_id: doc.chatbot_id,
            label: doc.name,
            content: doc.content,
            content_hash: doc.content_hash,
            sync_status: doc.sync_status,
            attempt_count: doc.attempt_count,
            last_attempt_at: doc.last_attempt_at,
            last_error: doc.last_error,
            metadata,
        }
    }
}

impl From<Link> for SourceRecord {
    #[inline]
    fn from(link: Link) -> Self {
        let metadata = serde_json::json!({
            "source_type": SourceType::Link,
            "url": link.url,
            "title": link.title,
        });
        Self {
            key: SourceKey::link(link.tenant_id, link.id),
            chatbot_id: link.chatbot_id,
            label: link.url,
            content: link.content,
            content_hash: link.content_hash,
            sync_status: link.sync_status,
            attempt_count: link.attempt_count,
            last_attempt_at: link.last_attempt_at,
            last_error: link.last_error,
            metadata,
        }
    }
}

impl SourceRecord {
    #[inline]
    pub fn is_synced(&self) -> bool {
        self.sync_status == SyncStatus::Synced
    }
}

/// Sources and sessions of one chatbot, as reported by `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatbotStatistics {
    pub chatbot: Chatbot,
    pub documents: i64,
    pub links: i64,
    pub pending_sources: i64,
    pub synced_sources: i64,
    pub failed_sources: i64,
    pub sessions: i64,
}

/// Hex SHA-256 of a source's content
#[inline]
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

impl SourceType {
    /// Table holding the source rows of this type
    #[inline]
    pub fn table_name(self) -> &'static str {
        match self {
            SourceType::Document => "documents",
            SourceType::Link => "links",
        }
    }
}
