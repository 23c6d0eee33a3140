use std::sync::Arc;

use crate::cache::VectorCache;
use crate::error::CoreError;
use crate::models::{l2_normalize, Encoding};
use crate::worker::WorkerPool;

/// Turns a query string into the `(dense, colbert, pooled)` triple used by
/// retrieval and reranking. The pooled projection is the same one used at
/// index time and is re-normalized here so stage-1 dot products are cosines.
pub struct QueryEncoder {
    pool: Arc<WorkerPool>,
    cache: Arc<VectorCache>,
    colbert_dim: usize,
}

impl QueryEncoder {
    pub fn new(pool: Arc<WorkerPool>, cache: Arc<VectorCache>, colbert_dim: usize) -> Self {
        Self {
            pool,
            cache,
            colbert_dim,
        }
    }

    pub async fn encode(&self, query: &str) -> Result<Encoding, CoreError> {
        if let Some(hit) = self.cache.get(query) {
            return Ok(hit);
        }
        let mut encoding = self.pool.embed_single(query).await?;
        if !encoding.colbert.is_empty() && encoding.colbert.dim != self.colbert_dim {
            tracing::warn!(
                "query colbert dim {} differs from configured {}; proceeding",
                encoding.colbert.dim,
                self.colbert_dim
            );
        }
        l2_normalize(&mut encoding.pooled);
        self.cache.put(query, encoding.clone());
        Ok(encoding)
    }
}
