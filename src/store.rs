//! Interface required of the external vector store.
//!
//! The on-disk engine itself is out of scope; the core only needs a table
//! supporting vector search, full-text search, filtered reads, and batched
//! upserts. Filters are SQL `WHERE` fragments interpreted by the store.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::ChunkRecord;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Open (creating if needed) the chunk table. Failure maps to
    /// `CoreError::StoreMissing` and yields empty search results upstream.
    async fn ensure_table(&self) -> Result<Arc<dyn ChunkTable>, CoreError>;
}

#[async_trait]
pub trait ChunkTable: Send + Sync {
    /// Approximate nearest-neighbor search over the dense vectors.
    async fn vector_search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<ChunkRecord>>;

    /// Full-text search over chunk content.
    async fn text_search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<ChunkRecord>>;

    /// Create the full-text index backing `text_search`.
    async fn create_fts_index(&self) -> Result<()>;

    /// Insert or replace records by id.
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<()>;

    /// Delete all records matching the SQL filter.
    async fn delete_where(&self, filter: &str) -> Result<()>;
}

/// Escape a string for use inside a single-quoted SQL literal.
pub fn escape_sql_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Normalize a path string to POSIX separators.
pub fn posix_normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// `WHERE` fragment restricting records to a path prefix.
pub fn path_prefix_filter(prefix: &str) -> String {
    format!("path LIKE '{}%'", escape_sql_literal(&posix_normalize(prefix)))
}

/// `WHERE` fragment selecting all records of one file.
pub fn path_filter(path: &str) -> String {
    format!("path = '{}'", escape_sql_literal(&posix_normalize(path)))
}
