//! Retrieval and ranking: hybrid dense+lexical search with RRF fusion,
//! two-stage reranking, and score shaping.

pub mod hybrid;
pub mod rerank;
pub mod shape;

pub use hybrid::{rrf_fuse, Fused, HybridRetriever};
pub use rerank::{late_interaction_rerank, pooled_prefilter, rrf_order, Scored};
pub use shape::{Ranked, ScoreShaper};
