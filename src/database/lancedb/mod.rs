// LanceDB vector database module
// Persistent chunk storage with atomic per-source replacement and similarity search


use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::vectors::{
    ChunkRecord, SearchFilters, SearchHit, VectorStore, rank_hits, validate_chunk_set,
};
use crate::database::{SourceKey, SourceType};
use crate::{Result, SyncError};

const TABLE_NAME: &str = "chunks";

/// Vector database store using LanceDB for similarity search
pub struct LanceVectorStore {
    connection: Connection,
    table_name: String,
    vector_dimension: usize,
}

impl LanceVectorStore {
    /// Open (or create) the chunk table under the configured vector directory
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        let db_path = config.vector_database_path();
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(&db_path).map_err(|e| {
            SyncError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", db_path.display());

        // Attempt to connect with corruption recovery
        let connection = match lancedb::connect(&uri).execute().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to LanceDB: {}", e);

                let error_msg = e.to_string().to_lowercase();
                if error_msg.contains("corrupt")
                    || error_msg.contains("invalid")
                    || error_msg.contains("malformed")
                {
                    warn!("Database corruption detected, attempting recovery");
                    Self::attempt_corruption_recovery(&db_path)?;

                    lancedb::connect(&uri).execute().await.map_err(|e| {
                        SyncError::Database(format!(
                            "Failed to connect to LanceDB after recovery: {}",
                            e
                        ))
                    })?
                } else {
                    return Err(SyncError::Database(format!(
                        "Failed to connect to LanceDB: {}",
                        e
                    )));
                }
            }
        };

        let mut store = Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            vector_dimension: config.ollama.embedding_dimension as usize,
        };

        store.initialize_table().await?;

        info!("Vector store initialized successfully");
        Ok(store)
    }

    #[inline]
    pub fn vector_dimension(&self) -> usize {
        self.vector_dimension
    }

    /// Create the chunk table if missing, otherwise adopt its vector dimension
    async fn initialize_table(&mut self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| SyncError::Database(format!("Failed to list tables: {}", e)))?;

        if table_names.contains(&self.table_name) {
            let existing = self.detect_existing_vector_dimension().await?;
            if existing != self.vector_dimension {
                warn!(
                    "Chunk table uses {} dimensions but {} are configured; keeping the table's dimension",
                    existing, self.vector_dimension
                );
                self.vector_dimension = existing;
            }
            return Ok(());
        }

        info!(
            "Creating chunk table with {} dimensions",
            self.vector_dimension
        );

        self.connection
            .create_empty_table(&self.table_name, self.create_schema())
            .execute()
            .await
            .map_err(|e| SyncError::Database(format!("Failed to create table: {}", e)))?;

        Ok(())
    }

    /// Detect vector dimension from existing table schema
    async fn detect_existing_vector_dimension(&self) -> Result<usize> {
        let table = self.open_table().await?;

        let schema = table
            .schema()
            .await
            .map_err(|e| SyncError::Database(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(SyncError::Database(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    async fn open_table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| SyncError::Database(format!("Failed to open table: {}", e)))
    }

    fn create_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.vector_dimension as i32,
                ),
                false,
            ),
            Field::new("tenant_id", DataType::Int64, false),
            Field::new("chatbot_id", DataType::Int64, false),
            Field::new("source_type", DataType::Utf8, false),
            Field::new("source_id", DataType::Int64, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new("updated_at", DataType::Utf8, false),
        ]))
    }

    /// Create a RecordBatch from chunk records
    fn create_record_batch(&self, records: &[ChunkRecord]) -> Result<RecordBatch> {
        let len = records.len();
        let vector_dim = self.vector_dimension;

        if let Some(bad) = records.iter().find(|r| r.embedding.len() != vector_dim) {
            return Err(SyncError::Embedding(format!(
                "Chunk {} has {} dimensions but the table expects {}",
                bad.id(),
                bad.embedding.len(),
                vector_dim
            )));
        }

        let ids: Vec<String> = records.iter().map(ChunkRecord::id).collect();
        let metadata: Vec<String> = records.iter().map(|r| r.metadata.to_string()).collect();
        let updated_ats: Vec<String> = records
            .iter()
            .map(|r| r.updated_at.to_rfc3339())
            .collect();

        let mut flat_values = Vec::with_capacity(len * vector_dim);
        for record in records {
            flat_values.extend_from_slice(&record.embedding);
        }
        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(values_array), None)
                .map_err(|e| {
                    SyncError::Database(format!("Failed to create vector array: {}", e))
                })?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(Int64Array::from_iter_values(
                records.iter().map(|r| r.key.tenant_id),
            )),
            Arc::new(Int64Array::from_iter_values(
                records.iter().map(|r| r.chatbot_id),
            )),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.key.source_type.as_str()),
            )),
            Arc::new(Int64Array::from_iter_values(
                records.iter().map(|r| r.key.source_id),
            )),
            Arc::new(UInt32Array::from_iter_values(
                records.iter().map(|r| r.chunk_index),
            )),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.text.as_str()),
            )),
            Arc::new(StringArray::from(metadata)),
            Arc::new(StringArray::from(updated_ats)),
        ];

        RecordBatch::try_new(self.create_schema(), arrays)
            .map_err(|e| SyncError::Database(format!("Failed to create record batch: {}", e)))
    }

    fn key_predicate(key: &SourceKey) -> String {
        format!(
            "tenant_id = {} AND source_type = '{}' AND source_id = {}",
            key.tenant_id, key.source_type, key.source_id
        )
    }

    fn filter_predicate(tenant_id: i64, filters: &SearchFilters) -> String {
        let mut predicate = format!("tenant_id = {}", tenant_id);
        if let Some(chatbot_id) = filters.chatbot_id {
            predicate.push_str(&format!(" AND chatbot_id = {}", chatbot_id));
        }
        if let Some(source_type) = filters.source_type {
            predicate.push_str(&format!(" AND source_type = '{}'", source_type));
        }
        predicate
    }

    async fn count_where(&self, predicate: Option<String>) -> Result<u64> {
        let table = self.open_table().await?;
        let count = table
            .count_rows(predicate)
            .await
            .map_err(|e| SyncError::Database(format!("Failed to count rows: {}", e)))?;
        Ok(count as u64)
    }

    /// Count then delete rows matching `predicate`
    async fn delete_where(&self, predicate: String) -> Result<u64> {
        let count = self.count_where(Some(predicate.clone())).await?;
        if count == 0 {
            return Ok(0);
        }

        let table = self.open_table().await?;
        table
            .delete(&predicate)
            .await
            .map_err(|e| SyncError::Database(format!("Failed to delete chunks: {}", e)))?;

        debug!("Deleted {} chunks where {}", count, predicate);
        Ok(count)
    }

    /// Read every row matching `predicate`
    async fn scan(&self, predicate: Option<String>) -> Result<Vec<ChunkRecord>> {
        let table = self.open_table().await?;
        let mut query = table.query();
        if let Some(predicate) = predicate {
            query = query.only_if(predicate);
        }

        let mut results = query
            .execute()
            .await
            .map_err(|e| SyncError::Database(format!("Failed to execute scan: {}", e)))?;

        let mut chunks = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| SyncError::Database(format!("Failed to read result stream: {}", e)))?
        {
            chunks.extend(Self::parse_batch(&batch)?.into_iter().map(|(c, _)| c));
        }
        Ok(chunks)
    }

    /// Parse a record batch into chunk records with their distances, if present
    fn parse_batch(batch: &RecordBatch) -> Result<Vec<(ChunkRecord, Option<f32>)>> {
        fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
            batch
                .column_by_name(name)
                .ok_or_else(|| SyncError::Database(format!("Missing {} column", name)))?
                .as_any()
                .downcast_ref::<T>()
                .ok_or_else(|| SyncError::Database(format!("Invalid {} column type", name)))
        }

        let vectors = column::<FixedSizeListArray>(batch, "vector")?;
        let tenant_ids = column::<Int64Array>(batch, "tenant_id")?;
        let chatbot_ids = column::<Int64Array>(batch, "chatbot_id")?;
        let source_types = column::<StringArray>(batch, "source_type")?;
        let source_ids = column::<Int64Array>(batch, "source_id")?;
        let chunk_indices = column::<UInt32Array>(batch, "chunk_index")?;
        let contents = column::<StringArray>(batch, "content")?;
        let metadata = column::<StringArray>(batch, "metadata")?;
        let updated_ats = column::<StringArray>(batch, "updated_at")?;

        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut rows = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let source_type: SourceType = source_types
                .value(row)
                .parse()
                .map_err(SyncError::Database)?;

            let embedding = vectors
                .value(row)
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| SyncError::Database("Invalid vector item type".to_string()))?
                .values()
                .to_vec();

            let updated_at = DateTime::parse_from_rfc3339(updated_ats.value(row))
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| SyncError::Database(format!("Invalid updated_at value: {}", e)))?;

            let chunk = ChunkRecord {
                key: SourceKey::new(tenant_ids.value(row), source_type, source_ids.value(row)),
                chatbot_id: chatbot_ids.value(row),
                chunk_index: chunk_indices.value(row),
                text: contents.value(row).to_string(),
                embedding,
                metadata: serde_json::from_str(metadata.value(row))
                    .unwrap_or_else(|_| serde_json::json!({})),
                updated_at,
            };

            let distance = distances.and_then(|d| (!d.is_null(row)).then(|| d.value(row)));
            rows.push((chunk, distance));
        }

        Ok(rows)
    }

    /// Optimize the vector database by compacting and reorganizing data
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        debug!("Optimizing vector database");

        let table = self.open_table().await?;
        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| SyncError::Database(format!("Failed to optimize table: {}", e)))?;

        info!("Vector database optimization completed");
        Ok(())
    }

    /// Check that the chunk table exists and can be read
    #[inline]
    pub async fn validate_integrity(&self) -> Result<bool> {
        debug!("Validating database integrity");

        let table_names = match self.connection.table_names().execute().await {
            Ok(names) => names,
            Err(e) => {
                error!("Failed to list tables during integrity check: {}", e);
                return Ok(false);
            }
        };

        if !table_names.contains(&self.table_name) {
            warn!("Chunk table missing during integrity check");
            return Ok(false);
        }

        match self.count_where(None).await {
            Ok(count) => {
                debug!("Database integrity check passed, {} rows found", count);
                Ok(true)
            }
            Err(e) => {
                error!("Failed to count rows during integrity check: {}", e);
                Ok(false)
            }
        }
    }

    /// Move a corrupted database aside so a fresh one can be created
    fn attempt_corruption_recovery(db_path: &Path) -> Result<()> {
        warn!("Attempting database corruption recovery at {:?}", db_path);

        if db_path.exists() {
            let backup_path = db_path.with_extension("corrupted_backup");
            if let Err(e) = std::fs::rename(db_path, &backup_path) {
                error!("Failed to backup corrupted database: {}", e);
            } else {
                info!("Corrupted database backed up to {:?}", backup_path);
            }
        }

        if db_path.exists() {
            std::fs::remove_dir_all(db_path).map_err(|e| {
                SyncError::Database(format!("Failed to remove corrupted database: {}", e))
            })?;
        }

        info!("Database corruption recovery completed");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    /// Replace a source's chunks in one table commit.
    ///
    /// `merge_insert` upserts the new rows and deletes the key's rows that
    /// are absent from the new set in the same version, so readers see
    /// either the previous version or the new one.
    async fn replace_chunks(&self, key: &SourceKey, chunks: Vec<ChunkRecord>) -> Result<u64> {
        validate_chunk_set(key, &chunks)?;

        if chunks.is_empty() {
            return self.delete_by_key(key).await;
        }

        let expected = chunks.len() as u64;
        let record_batch = self.create_record_batch(&chunks)?;
        let table = self.open_table().await?;
        let predicate = Self::key_predicate(key);

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all()
            .when_not_matched_by_source_delete(Some(predicate.clone()));
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| SyncError::Database(format!("Failed to replace chunks: {}", e)))?;

        let stored = self.count_where(Some(predicate)).await?;
        if stored != expected {
            return Err(SyncError::Consistency(format!(
                "source {} holds {} chunks after replace, expected {}",
                key, stored, expected
            )));
        }

        debug!("Replaced chunk set for {} with {} chunks", key, expected);
        Ok(expected)
    }

    async fn delete_by_key(&self, key: &SourceKey) -> Result<u64> {
        self.delete_where(Self::key_predicate(key)).await
    }

    async fn delete_by_tenant(&self, tenant_id: i64) -> Result<u64> {
        self.delete_where(format!("tenant_id = {}", tenant_id)).await
    }

    async fn delete_by_chatbot(&self, tenant_id: i64, chatbot_id: i64) -> Result<u64> {
        self.delete_where(format!(
            "tenant_id = {} AND chatbot_id = {}",
            tenant_id, chatbot_id
        ))
        .await
    }

    async fn search(
        &self,
        tenant_id: i64,
        query_vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        debug!("Searching tenant {} with limit: {}", tenant_id, top_k);

        if top_k == 0 {
            return Ok(Vec::new());
        }

        let table = self.open_table().await?;

        // Over-fetch so equal scores can be re-ordered before truncation
        let mut results = table
            .vector_search(query_vector)
            .map_err(|e| SyncError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .only_if(Self::filter_predicate(tenant_id, filters))
            .limit(top_k.saturating_mul(2))
            .execute()
            .await
            .map_err(|e| SyncError::Database(format!("Failed to execute search: {}", e)))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| SyncError::Database(format!("Failed to read result stream: {}", e)))?
        {
            for (chunk, distance) in Self::parse_batch(&batch)? {
                // Convert cosine distance to similarity score (higher is better)
                let score = 1.0 - distance.unwrap_or(1.0);
                if filters.accepts_score(score) {
                    hits.push(SearchHit { chunk, score });
                }
            }
        }

        Ok(rank_hits(hits, top_k))
    }

    async fn chunks_for_key(&self, key: &SourceKey) -> Result<Vec<ChunkRecord>> {
        let mut chunks = self.scan(Some(Self::key_predicate(key))).await?;
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn count_by_key(&self, key: &SourceKey) -> Result<u64> {
        self.count_where(Some(Self::key_predicate(key))).await
    }

    async fn count_by_chatbot(&self, tenant_id: i64, chatbot_id: i64) -> Result<u64> {
        self.count_where(Some(format!(
            "tenant_id = {} AND chatbot_id = {}",
            tenant_id, chatbot_id
        )))
        .await
    }

    async fn source_chunk_counts(&self) -> Result<HashMap<SourceKey, u64>> {
        let mut counts = HashMap::new();
        for chunk in self.scan(None).await? {
            *counts.entry(chunk.key).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
