use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::config::RRF_K;
use crate::error::CoreError;
use crate::models::ChunkRecord;
use crate::store::{path_prefix_filter, ChunkTable};

/// A fused candidate: the record plus its accumulated RRF score.
#[derive(Debug, Clone)]
pub struct Fused {
    pub record: ChunkRecord,
    pub rrf_score: f32,
}

/// Runs dense ANN and lexical FTS in parallel and fuses the two ranked
/// lists with Reciprocal Rank Fusion.
pub struct HybridRetriever {
    /// One-shot: the FTS index is created lazily on the first query and the
    /// check is never repeated within the process lifetime.
    fts_checked: AtomicBool,
}

impl Default for HybridRetriever {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridRetriever {
    pub fn new() -> Self {
        Self {
            fts_checked: AtomicBool::new(false),
        }
    }

    /// Retrieve up to `stage1_k` fused candidates. A dense failure (missing
    /// table) yields an empty list; an FTS failure logs and contributes
    /// nothing, but never fails the query.
    pub async fn retrieve(
        &self,
        table: &Arc<dyn ChunkTable>,
        dense_query: &[f32],
        query_text: &str,
        pre_rerank_k: usize,
        stage1_k: usize,
        path_prefix: Option<&str>,
    ) -> Result<Vec<Fused>, CoreError> {
        let filter = path_prefix.map(path_prefix_filter);
        let filter = filter.as_deref();

        let (dense, lexical) = tokio::join!(
            table.vector_search(dense_query, pre_rerank_k, filter),
            self.text_search(table, query_text, pre_rerank_k, filter),
        );

        let dense = match dense {
            Ok(rows) => rows,
            Err(err) => {
                warn!("dense search failed: {err}");
                return Ok(Vec::new());
            }
        };

        Ok(rrf_fuse(dense, lexical, stage1_k))
    }

    async fn text_search(
        &self,
        table: &Arc<dyn ChunkTable>,
        query: &str,
        limit: usize,
        filter: Option<&str>,
    ) -> Vec<ChunkRecord> {
        if !self.fts_checked.swap(true, Ordering::SeqCst) {
            if let Err(err) = table.create_fts_index().await {
                warn!(
                    "{} (continuing dense-only)",
                    CoreError::FtsUnavailable(err.to_string())
                );
            }
        }
        match table.text_search(query, limit, filter).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(
                    "{} (contributing zero rows)",
                    CoreError::FtsUnavailable(err.to_string())
                );
                Vec::new()
            }
        }
    }
}

/// Reciprocal Rank Fusion over the dense and lexical lists. The dense list
/// is folded first, so equal fused scores keep dense insertion order.
pub fn rrf_fuse(dense: Vec<ChunkRecord>, lexical: Vec<ChunkRecord>, limit: usize) -> Vec<Fused> {
    let mut fused: Vec<Fused> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for list in [dense, lexical] {
        for (rank, record) in list.into_iter().enumerate() {
            let score = 1.0 / (RRF_K + rank as f32 + 1.0);
            let key = record.fusion_key();
            match by_key.get(&key) {
                Some(&idx) => fused[idx].rrf_score += score,
                None => {
                    by_key.insert(key, fused.len());
                    fused.push(Fused {
                        record,
                        rrf_score: score,
                    });
                }
            }
        }
    }

    // Stable sort: ties keep insertion order (dense first).
    fused.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused.truncate(limit);
    fused
}
