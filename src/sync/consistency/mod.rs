// Database consistency validation module
// Compares source rows in SQLite with the chunk sets held by the vector store


use anyhow::Result;
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info, warn};

use crate::database::SourceKey;
use crate::database::sqlite::Database;
use crate::sync::{SourceMetadata, SyncCoordinator, SyncOutcome};

/// Consistency check results between SQLite and the vector store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Number of document and link rows
    pub sources: usize,
    /// Number of source keys holding chunks
    pub indexed_sources: usize,
    /// Total chunks in the vector store
    pub total_chunks: u64,
    /// Sources marked synced that have no chunks
    pub missing_chunks: Vec<SourceKey>,
    /// Chunk sets whose source row no longer exists
    pub orphaned_chunks: Vec<SourceKey>,
    /// Chatbots with missing chunk sets
    pub inconsistent_chatbots: Vec<ChatbotConsistencyIssue>,
    /// Overall consistency status
    pub is_consistent: bool,
}

/// Consistency issue for a specific chatbot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatbotConsistencyIssue {
    pub chatbot_id: i64,
    pub synced_sources: usize,
    pub missing_chunks: Vec<SourceKey>,
}

/// Outcome of a repair pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub orphaned_chunks_deleted: u64,
    pub sources_resynced: usize,
    pub sources_failed: usize,
}

/// Performs consistency validation between SQLite and the vector store
pub struct ConsistencyValidator<'a> {
    database: &'a Database,
    coordinator: &'a SyncCoordinator,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(database: &'a Database, coordinator: &'a SyncCoordinator) -> Self {
        Self {
            database,
            coordinator,
        }
    }

    /// Perform a full consistency check between SQLite and the vector store
    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        info!("Starting cross-database consistency validation");

        let sources = self.database.list_sources(None).await?;
        debug!("Found {} sources in SQLite", sources.len());

        let chunk_counts = self.coordinator.store().source_chunk_counts().await?;
        debug!("Found {} chunk sets in the vector store", chunk_counts.len());

        let source_keys: HashSet<SourceKey> = sources.iter().map(|s| s.key).collect();

        let mut missing_chunks = Vec::new();
        let mut by_chatbot: BTreeMap<i64, (usize, Vec<SourceKey>)> = BTreeMap::new();
        for source in sources.iter().filter(|s| s.is_synced()) {
            let entry = by_chatbot.entry(source.chatbot_id).or_default();
            entry.0 += 1;
            if chunk_counts.get(&source.key).copied().unwrap_or(0) == 0 {
                missing_chunks.push(source.key);
                entry.1.push(source.key);
            }
        }

        let mut orphaned_chunks: Vec<SourceKey> = chunk_counts
            .keys()
            .filter(|key| !source_keys.contains(key))
            .copied()
            .collect();
        orphaned_chunks.sort();
        missing_chunks.sort();

        let inconsistent_chatbots = by_chatbot
            .into_iter()
            .filter(|(_, (_, missing))| !missing.is_empty())
            .map(|(chatbot_id, (synced_sources, missing_chunks))| ChatbotConsistencyIssue {
                chatbot_id,
                synced_sources,
                missing_chunks,
            })
            .collect::<Vec<_>>();

        let is_consistent = missing_chunks.is_empty() && orphaned_chunks.is_empty();

        let report = ConsistencyReport {
            sources: sources.len(),
            indexed_sources: chunk_counts.len(),
            total_chunks: chunk_counts.values().sum(),
            missing_chunks,
            orphaned_chunks,
            inconsistent_chatbots,
            is_consistent,
        };

        if report.is_consistent {
            info!("Database consistency validation passed");
        } else {
            warn!("Database consistency validation found issues");
            Self::log_consistency_issues(&report);
        }

        Ok(report)
    }

    /// Delete orphaned chunk sets and re-sync sources that lost their chunks
    #[inline]
    pub async fn repair(&self, report: &ConsistencyReport) -> Result<RepairReport> {
        let orphaned_chunks_deleted = self.cleanup_orphaned_chunks(&report.orphaned_chunks).await?;
        let (sources_resynced, sources_failed) =
            self.regenerate_missing_chunks(&report.missing_chunks).await?;

        Ok(RepairReport {
            orphaned_chunks_deleted,
            sources_resynced,
            sources_failed,
        })
    }

    /// Remove chunk sets that have no corresponding source row
    #[inline]
    pub async fn cleanup_orphaned_chunks(&self, keys: &[SourceKey]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        info!("Cleaning up {} orphaned chunk sets", keys.len());

        let mut deleted = 0;
        for key in keys {
            match self.coordinator.delete_source(key).await {
                Ok(count) => {
                    deleted += count;
                    debug!("Cleaned up {} orphaned chunks for {}", count, key);
                }
                Err(e) => {
                    error!("Failed to delete orphaned chunks for {}: {}", key, e);
                }
            }
        }

        info!("Successfully cleaned up {} orphaned chunks", deleted);
        Ok(deleted)
    }

    /// Re-sync sources marked synced that have no chunks; returns (synced, failed)
    #[inline]
    pub async fn regenerate_missing_chunks(&self, keys: &[SourceKey]) -> Result<(usize, usize)> {
        if keys.is_empty() {
            return Ok((0, 0));
        }

        info!("Regenerating chunks for {} sources", keys.len());

        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            match self.database.get_source(key).await? {
                Some(source) => handles.push(self.coordinator.request_sync(
                    source.key,
                    source.content,
                    SourceMetadata::new(source.chatbot_id, source.metadata),
                )),
                None => warn!("Source {} disappeared before it could be re-synced", key),
            }
        }

        let outcomes = join_all(handles.into_iter().map(|h| h.wait())).await;
        let synced = outcomes.iter().filter(|o| o.is_synced()).count();
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::Failed { .. }))
            .count();

        info!("Successfully regenerated chunks for {} sources", synced);
        Ok((synced, failed))
    }

    fn log_consistency_issues(report: &ConsistencyReport) {
        if !report.missing_chunks.is_empty() {
            warn!(
                "Found {} synced sources with no chunks",
                report.missing_chunks.len()
            );
        }

        if !report.orphaned_chunks.is_empty() {
            warn!(
                "Found {} orphaned chunk sets in the vector store",
                report.orphaned_chunks.len()
            );
        }

        for issue in &report.inconsistent_chatbots {
            warn!(
                "Chatbot {} has {} of {} synced sources without chunks",
                issue.chatbot_id,
                issue.missing_chunks.len(),
                issue.synced_sources
            );
        }
    }
}

impl ConsistencyReport {
    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Database is consistent: {} sources in SQLite, {} chunks across {} sources in the vector store",
                self.sources, self.total_chunks, self.indexed_sources
            )
        } else {
            format!(
                "Database inconsistencies found: {} sources missing chunks, {} orphaned chunk sets, {} chatbots with issues",
                self.missing_chunks.len(),
                self.orphaned_chunks.len(),
                self.inconsistent_chatbots.len()
            )
        }
    }

    /// Get the total number of consistency issues
    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_chunks.len() + self.orphaned_chunks.len()
    }
}
