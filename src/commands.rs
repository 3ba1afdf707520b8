use anyhow::{Context, Result};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::lancedb::LanceVectorStore;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{NewDocument, NewLink, SourceContentUpdate, SyncStatus};
use crate::database::{SourceKey, SourceType, VectorStore};
use crate::embeddings::{EmbeddingBackend, OllamaClient};
use crate::sources::SourceService;
use crate::sync::{SessionStore, StatusRecorder, SyncCoordinator, SyncHandle, SyncOutcome};

/// Open SQLite, LanceDB and Ollama and wire them into a source service
#[inline]
pub async fn open_service(config: &Config) -> Result<SourceService> {
    let database = Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")?;
    let store = LanceVectorStore::new(config)
        .await
        .context("Failed to initialize vector store")?;
    let backend: Arc<dyn EmbeddingBackend> =
        Arc::new(OllamaClient::new(config).context("Failed to create Ollama client")?);

    let records = Arc::new(database.clone());
    let coordinator = SyncCoordinator::new(
        config,
        Arc::clone(&backend),
        Arc::new(store) as Arc<dyn VectorStore>,
        Arc::clone(&records) as Arc<dyn StatusRecorder>,
        records as Arc<dyn SessionStore>,
    );

    Ok(SourceService::new(
        database,
        coordinator,
        backend,
        config.search.clone(),
    ))
}

// Chatbots

#[inline]
pub async fn add_chatbot(service: &SourceService, tenant_id: i64, name: &str) -> Result<()> {
    let chatbot = service.add_chatbot(tenant_id, name).await?;
    println!("Created chatbot: {} (ID: {})", chatbot.name, chatbot.id);
    println!("Tenant: {}", chatbot.tenant_id);
    Ok(())
}

#[inline]
pub async fn list_chatbots(service: &SourceService) -> Result<()> {
    let chatbots = service.list_chatbots().await?;

    if chatbots.is_empty() {
        println!("No chatbots have been added yet.");
        println!("Use 'ragsync chatbot add <tenant> <name>' to add one.");
        return Ok(());
    }

    println!("Chatbots ({} total):", chatbots.len());
    println!();

    for chatbot in &chatbots {
        println!("🤖 {} (ID: {})", chatbot.name, chatbot.id);
        println!("   Tenant: {}", chatbot.tenant_id);
        match service.chatbot_status(chatbot.id).await {
            Ok(Some(status)) => {
                let stats = &status.statistics;
                println!(
                    "   Sources: {} documents, {} links",
                    stats.documents, stats.links
                );
                println!(
                    "   Sync: {} synced, {} pending, {} failed",
                    stats.synced_sources, stats.pending_sources, stats.failed_sources
                );
                println!("   Chunks: {}", status.chunks);
                println!("   Sessions: {}", stats.sessions);
            }
            Ok(None) => println!("   Statistics: Not available"),
            Err(e) => println!("   Statistics: Error - {}", e),
        }
        println!();
    }

    Ok(())
}

#[inline]
pub async fn delete_chatbot(service: &SourceService, chatbot_id: i64) -> Result<()> {
    match service.delete_chatbot(chatbot_id).await? {
        Some(report) => {
            println!("Chatbot deleted (ID: {})", chatbot_id);
            println!("✓ {} chunks deleted", report.chunks_deleted);
            println!("✓ {} chat sessions deleted", report.sessions_deleted);
            println!("✓ Documents and links deleted");
        }
        None => println!("Chatbot {} not found", chatbot_id),
    }
    Ok(())
}

// Documents

#[inline]
pub async fn add_document(
    service: &SourceService,
    chatbot_id: i64,
    path: &Path,
    name: Option<String>,
) -> Result<()> {
    let chatbot = service
        .database()
        .get_chatbot(chatbot_id)
        .await?
        .with_context(|| format!("Chatbot {} not found", chatbot_id))?;
    let content = read_content(path)?;
    let name = name.unwrap_or_else(|| file_name(path));

    let (document, handle) = service
        .add_document(NewDocument {
            tenant_id: chatbot.tenant_id,
            chatbot_id: chatbot.id,
            name,
            file_type: file_type(path),
            content,
        })
        .await?;

    println!("Added document: {} (ID: {})", document.name, document.id);
    report_outcome(handle).await;
    Ok(())
}

#[inline]
pub async fn update_document(
    service: &SourceService,
    id: i64,
    path: Option<&Path>,
    name: Option<String>,
) -> Result<()> {
    let update = SourceContentUpdate {
        label: name,
        title: None,
        content: path.map(read_content).transpose()?,
    };

    match service.update_document(id, update).await? {
        Some((document, Some(handle))) => {
            println!("Updated document: {} (ID: {})", document.name, document.id);
            report_outcome(handle).await;
        }
        Some((document, None)) => {
            println!("Updated document: {} (ID: {})", document.name, document.id);
            println!("Content unchanged, no re-sync needed");
        }
        None => println!("Document {} not found", id),
    }
    Ok(())
}

#[inline]
pub async fn delete_document(service: &SourceService, id: i64) -> Result<()> {
    match service.delete_document(id).await? {
        Some(chunks) => println!("Document {} deleted ({} chunks removed)", id, chunks),
        None => println!("Document {} not found", id),
    }
    Ok(())
}

// Links

#[inline]
pub async fn add_link(
    service: &SourceService,
    chatbot_id: i64,
    url: String,
    title: Option<String>,
    content_path: &Path,
) -> Result<()> {
    let chatbot = service
        .database()
        .get_chatbot(chatbot_id)
        .await?
        .with_context(|| format!("Chatbot {} not found", chatbot_id))?;

    let (link, handle) = service
        .add_link(NewLink {
            tenant_id: chatbot.tenant_id,
            chatbot_id: chatbot.id,
            url,
            title,
            content: read_content(content_path)?,
        })
        .await?;

    println!("Added link: {} (ID: {})", link.url, link.id);
    report_outcome(handle).await;
    Ok(())
}

#[inline]
pub async fn update_link(
    service: &SourceService,
    id: i64,
    url: Option<String>,
    title: Option<String>,
    content_path: Option<&Path>,
) -> Result<()> {
    let update = SourceContentUpdate {
        label: url,
        title,
        content: content_path.map(read_content).transpose()?,
    };

    match service.update_link(id, update).await? {
        Some((link, Some(handle))) => {
            println!("Updated link: {} (ID: {})", link.url, link.id);
            report_outcome(handle).await;
        }
        Some((link, None)) => {
            println!("Updated link: {} (ID: {})", link.url, link.id);
            println!("Content unchanged, no re-sync needed");
        }
        None => println!("Link {} not found", id),
    }
    Ok(())
}

#[inline]
pub async fn delete_link(service: &SourceService, id: i64) -> Result<()> {
    match service.delete_link(id).await? {
        Some(chunks) => println!("Link {} deleted ({} chunks removed)", id, chunks),
        None => println!("Link {} not found", id),
    }
    Ok(())
}

// Sync control

#[inline]
pub async fn retry_source(
    service: &SourceService,
    tenant_id: i64,
    source_type: SourceType,
    id: i64,
) -> Result<()> {
    let key = SourceKey::new(tenant_id, source_type, id);
    let handle = service.retry(&key).await?;
    println!("Retrying sync for {}", key);
    report_outcome(handle).await;
    Ok(())
}

/// Re-sync every pending or failed source and wait for the results
#[inline]
pub async fn reconcile(service: &SourceService, chatbot_id: Option<i64>) -> Result<()> {
    let handles = service.reconcile(chatbot_id).await?;
    if handles.is_empty() {
        println!("All sources are synced");
        return Ok(());
    }

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(handles.len() as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Syncing {msg}")
                .context("Invalid progress bar template")?,
        )
    } else {
        ProgressBar::hidden()
    };

    let mut pending: FuturesUnordered<_> = handles
        .into_iter()
        .map(|handle| async move {
            let key = handle.key();
            (key, handle.wait().await)
        })
        .collect();

    let (mut synced, mut failed, mut superseded) = (0_usize, 0_usize, 0_usize);
    while let Some((key, outcome)) = pending.next().await {
        bar.set_message(key.to_string());
        bar.inc(1);
        match outcome {
            SyncOutcome::Synced { .. } => synced += 1,
            SyncOutcome::Failed { error, .. } => {
                failed += 1;
                bar.suspend(|| println!("❌ {}: {}", key, error));
            }
            SyncOutcome::Superseded => superseded += 1,
        }
    }
    bar.finish_and_clear();

    info!(
        "Reconcile finished: {} synced, {} failed, {} superseded",
        synced, failed, superseded
    );
    println!("Reconcile completed!");
    println!("  Synced: {}", synced);
    println!("  Failed: {}", failed);
    if superseded > 0 {
        println!("  Superseded by newer changes: {}", superseded);
    }
    Ok(())
}

/// Compare SQLite with the vector store and optionally repair differences
#[inline]
pub async fn check_consistency(service: &SourceService, repair: bool) -> Result<()> {
    let validator = service.validator();
    let report = validator.validate_consistency().await?;
    println!("{}", report.summary());

    for key in &report.missing_chunks {
        println!("   Missing chunks: {}", key);
    }
    for key in &report.orphaned_chunks {
        println!("   Orphaned chunks: {}", key);
    }

    if report.is_consistent || !repair {
        if !report.is_consistent {
            println!("Run 'ragsync check --repair' to fix these issues.");
        }
        return Ok(());
    }

    let repaired = validator.repair(&report).await?;
    println!("Repair completed!");
    println!(
        "  Orphaned chunks deleted: {}",
        repaired.orphaned_chunks_deleted
    );
    println!("  Sources re-synced: {}", repaired.sources_resynced);
    if repaired.sources_failed > 0 {
        warn!("{} sources failed to re-sync", repaired.sources_failed);
        println!("  Sources still failing: {}", repaired.sources_failed);
    }
    Ok(())
}

#[inline]
pub async fn search(
    service: &SourceService,
    chatbot_id: i64,
    query: &str,
    top_k: Option<usize>,
) -> Result<()> {
    let hits = service.search(chatbot_id, query, top_k).await?;

    if hits.is_empty() {
        println!("No matching chunks found");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        let label = hit
            .chunk
            .metadata
            .get("filename")
            .or_else(|| hit.chunk.metadata.get("url"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        println!(
            "{}. [{:.3}] {} #{} ({})",
            rank + 1,
            hit.score,
            hit.chunk.key,
            hit.chunk.chunk_index,
            label
        );
        println!("   {}", preview(&hit.chunk.text, 200));
    }
    Ok(())
}

/// Show connectivity and per-chatbot sync state
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 ragsync Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🗄️  Database Status:");
    let database = match Database::initialize_from_config_dir(config.get_base_dir()).await {
        Ok(db) => {
            println!("   ✅ SQLite: Connected");
            Some(db)
        }
        Err(e) => {
            println!("   ❌ SQLite: Failed to connect - {}", e);
            None
        }
    };

    println!("🤖 Ollama Status:");
    match OllamaClient::new(config) {
        Ok(client) => match tokio::task::spawn_blocking(move || client.health_check()).await {
            Ok(Ok(())) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                println!("   📋 Model: {}", config.ollama.model);
                println!("   🔢 Batch Size: {}", config.ollama.batch_size);
            }
            Ok(Err(e)) => println!("   ⚠️  Ollama: Connected but unhealthy - {}", e),
            Err(e) => println!("   ❌ Ollama: Health check did not complete - {}", e),
        },
        Err(e) => println!("   ❌ Ollama: Failed to connect - {}", e),
    }

    println!("🔍 Vector Database Status:");
    match LanceVectorStore::new(config).await {
        Ok(store) => match store.validate_integrity().await {
            Ok(true) => println!(
                "   ✅ LanceDB: Connected ({} dimensions)",
                store.vector_dimension()
            ),
            Ok(false) => println!("   ⚠️  LanceDB: Connected but integrity check failed"),
            Err(e) => println!("   ⚠️  LanceDB: Connected but unreadable - {}", e),
        },
        Err(e) => println!("   ❌ LanceDB: Failed to connect - {}", e),
    }

    let Some(database) = database else {
        return Ok(());
    };

    println!();
    println!("🔄 Sync Status:");
    let sources = database.list_sources(None).await?;
    let counts = sources.iter().counts_by(|s| s.sync_status);
    let count = |status: SyncStatus| counts.get(&status).copied().unwrap_or(0);
    println!("   Sources: {}", sources.len());
    println!("   Synced: {}", count(SyncStatus::Synced));
    println!("   Pending: {}", count(SyncStatus::Pending));
    println!("   Failed: {}", count(SyncStatus::Error));

    let failures: Vec<_> = sources
        .iter()
        .filter(|s| s.sync_status == SyncStatus::Error)
        .collect();
    if !failures.is_empty() {
        println!();
        println!("⚠️  Failed Sources:");
        for source in failures {
            println!(
                "   {} ({}) after {} attempts: {}",
                source.key,
                source.label,
                source.attempt_count,
                source.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

async fn report_outcome(handle: SyncHandle) {
    let key = handle.key();
    match handle.wait().await {
        SyncOutcome::Synced { chunks, truncated } => {
            println!("✓ Synced {} chunks for {}", chunks, key);
            if truncated {
                println!("⚠️  Content exceeded the chunk limit and was truncated");
            }
        }
        SyncOutcome::Failed { attempts, error } => {
            println!("❌ Sync failed for {} after {} attempts: {}", key, attempts, error);
            println!("Use 'ragsync retry' once the problem is fixed.");
        }
        SyncOutcome::Superseded => {
            println!("Sync for {} was superseded by a newer change", key);
        }
    }
}

fn read_content(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn file_type(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn file_helpers() {
        let path = PathBuf::from("/tmp/docs/Guide.MD");
        assert_eq!(file_name(&path), "Guide.MD");
        assert_eq!(file_type(&path), Some("md".to_string()));
        assert_eq!(file_type(Path::new("README")), None);
    }

    #[test]
    fn preview_truncates_and_flattens() {
        assert_eq!(preview("short\n\ntext", 20), "short text");
        let long = "a".repeat(30);
        assert_eq!(preview(&long, 10), format!("{}...", "a".repeat(10)));
    }

    #[test]
    fn read_content_reports_missing_file() {
        let err = read_content(Path::new("/nonexistent/ragsync.txt"))
            .expect_err("missing file should fail");
        assert!(err.to_string().contains("Failed to read"));
    }
}
