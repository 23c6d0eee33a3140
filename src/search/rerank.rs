use tracing::warn;

use crate::models::{dot, ChunkRecord, QuantizedMatrix};
use crate::search::hybrid::Fused;
use crate::worker::WorkerPool;

/// A candidate carrying both ranking signals, ready for blending.
#[derive(Debug, Clone)]
pub struct Scored {
    pub record: ChunkRecord,
    pub rrf_score: f32,
    pub rerank_score: f32,
}

/// Stage 1: pooled-cosine prefilter. Both sides are unit-norm, so the dot
/// product is the cosine. Runs only when there are more candidates than
/// `stage2_k` and a pooled query vector is present; candidates lacking a
/// pooled vector score -1. Otherwise the input passes through unchanged, in
/// order.
pub fn pooled_prefilter(
    candidates: Vec<Fused>,
    pooled_query: &[f32],
    stage2_k: usize,
) -> Vec<Fused> {
    if candidates.len() <= stage2_k || pooled_query.is_empty() {
        return candidates;
    }
    let mut scored: Vec<(f32, Fused)> = candidates
        .into_iter()
        .map(|c| {
            let score = if c.record.pooled_colbert.is_empty() {
                -1.0
            } else {
                dot(pooled_query, &c.record.pooled_colbert)
            };
            (score, c)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(stage2_k);
    scored.into_iter().map(|(_, c)| c).collect()
}

/// Stage 2: late-interaction (MaxSim) scoring of the top `rerank_top`
/// candidates via the worker pool. Worker failures leave the rerank scores
/// at zero, so the blend falls back to fused order; a search never fails on
/// a worker restart.
pub async fn late_interaction_rerank(
    pool: &WorkerPool,
    query: &QuantizedMatrix,
    candidates: Vec<Fused>,
    rerank_top: usize,
) -> Vec<Scored> {
    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .map(|c| Scored {
            rrf_score: c.rrf_score,
            rerank_score: 0.0,
            record: c.record,
        })
        .collect();

    let n = scored.len().min(rerank_top);
    if n == 0 || query.is_empty() {
        return scored;
    }

    let docs: Vec<QuantizedMatrix> = scored[..n]
        .iter()
        .map(|s| s.record.colbert.clone())
        .collect();

    match pool.rerank(query.clone(), docs).await {
        Ok(scores) => {
            for (item, score) in scored.iter_mut().zip(scores) {
                item.rerank_score = score;
            }
        }
        Err(err) => {
            warn!("late-interaction rerank unavailable, keeping fused order: {err}");
        }
    }
    scored
}

/// Rerank disabled: keep RRF order, with a tiny monotonic tie-breaker so
/// downstream blending cannot reorder equal fused scores.
pub fn rrf_order(candidates: Vec<Fused>) -> Vec<Scored> {
    candidates
        .into_iter()
        .enumerate()
        .map(|(idx, c)| Scored {
            rrf_score: c.rrf_score,
            rerank_score: 1.0 / (idx as f32 + 1.0),
            record: c.record,
        })
        .collect()
}
