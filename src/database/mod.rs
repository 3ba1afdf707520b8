// Database module
// SQLite is the source-of-record, the vector store holds chunk embeddings

pub mod lancedb;
pub mod memory;
pub mod source_key;
pub mod sqlite;
pub mod vectors;

pub use source_key::{SourceKey, SourceType};
pub use sqlite::*;
pub use vectors::{ChunkRecord, SearchFilters, SearchHit, VectorStore};
