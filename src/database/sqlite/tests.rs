use super::*;
use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

async fn seed_document(database: &Database, content: &str) -> Result<(Chatbot, Document)> {
    let chatbot = database
        .create_chatbot(NewChatbot {
            tenant_id: 1,
            name: "Helpdesk".to_string(),
        })
        .await?;
    let document = database
        .create_document(NewDocument {
            tenant_id: 1,
            chatbot_id: chatbot.id,
            name: "guide.md".to_string(),
            file_type: Some("md".to_string()),
            content: content.to_string(),
        })
        .await?;
    Ok((chatbot, document))
}

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> = ["chatbots", "documents", "links", "chat_sessions"]
        .into_iter()
        .collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn integration_foreign_key_constraints() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let orphan = database
        .create_document(NewDocument {
            tenant_id: 1,
            chatbot_id: 999,
            name: "orphan.txt".to_string(),
            file_type: None,
            content: "no owner".to_string(),
        })
        .await;
    assert!(orphan.is_err(), "documents must reference an existing chatbot");

    Ok(())
}

#[tokio::test]
async fn integration_status_recorder() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let (_chatbot, document) = seed_document(&database, "AAAA").await?;
    let key = SourceKey::document(1, document.id);

    database
        .record_status(&key, &SyncStatusUpdate::retrying(1, "timeout", Utc::now()))
        .await?;
    let record = database.get_source(&key).await?.expect("source should exist");
    assert_eq!(record.sync_status, SyncStatus::Pending);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.last_error.as_deref(), Some("timeout"));

    database
        .record_status(&key, &SyncStatusUpdate::synced(Utc::now()))
        .await?;
    let record = database.get_source(&key).await?.expect("source should exist");
    assert!(record.is_synced());
    assert_eq!(record.attempt_count, 0);
    assert!(record.last_error.is_none());

    // Recording against a deleted row is not an error
    database.delete_document(document.id).await?;
    database
        .record_status(&key, &SyncStatusUpdate::pending())
        .await?;

    Ok(())
}

#[tokio::test]
async fn integration_session_store() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let (chatbot, _document) = seed_document(&database, "text").await?;

    for _ in 0..3 {
        database.create_session(1, chatbot.id).await?;
    }
    assert_eq!(database.count_sessions(1, chatbot.id).await?, 3);

    // Tenant mismatch deletes nothing
    assert_eq!(database.delete_sessions_for_chatbot(2, chatbot.id).await?, 0);
    assert_eq!(database.delete_sessions_for_chatbot(1, chatbot.id).await?, 3);
    assert_eq!(database.delete_sessions_for_chatbot(1, chatbot.id).await?, 0);

    Ok(())
}

#[tokio::test]
async fn integration_concurrent_access() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let (chatbot, _document) = seed_document(&database, "seed").await?;

    let mut handles = Vec::new();
    for i in 0..10 {
        let db = database.clone();
        let chatbot_id = chatbot.id;
        handles.push(tokio::spawn(async move {
            db.create_link(NewLink {
                tenant_id: 1,
                chatbot_id,
                url: format!("https://example.com/page{}", i),
                title: None,
                content: format!("page {}", i),
            })
            .await
        }));
    }

    for handle in handles {
        handle.await??;
    }

    let sources = database.list_sources(Some(chatbot.id)).await?;
    assert_eq!(sources.len(), 11);

    database.optimize().await?;
    Ok(())
}
