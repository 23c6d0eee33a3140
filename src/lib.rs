//! # osgrep-core
//!
//! Retrieval and ranking core for structure-aware semantic code search:
//! ingest a repository into an embedding index and answer natural-language
//! queries with ranked code chunks.
//!
//! ## Architecture
//!
//! The query pipeline:
//!
//! ```text
//!                        ┌──────────────┐
//!                        │  User Query   │
//!                        └──────┬────────┘
//!                               │ worker pool (encode)
//!                               ▼
//!                  ┌─────────────────────────┐
//!                  │ dense · colbert · pooled │
//!                  └────────────┬────────────┘
//!            ┌──────────────────┴──────────────────┐
//!            ▼                                     ▼
//!     ┌─────────────┐                       ┌─────────────┐
//!     │  Dense ANN   │                       │ Lexical FTS  │
//!     │ (PRE_K rows) │                       │ (PRE_K rows) │
//!     └──────┬──────┘                       └──────┬──────┘
//!            └──────────────────┬──────────────────┘
//!                               ▼
//!                  ┌─────────────────────────┐
//!                  │  RRF Fusion (k = 60)     │
//!                  │  keep top STAGE1_K       │
//!                  └────────────┬────────────┘
//!                               ▼
//!                  ┌─────────────────────────┐
//!                  │ Pooled-cosine prefilter  │
//!                  │  keep top STAGE2_K       │
//!                  └────────────┬────────────┘
//!                               │ worker pool (MaxSim)
//!                               ▼
//!                  ┌─────────────────────────┐
//!                  │ Late-interaction rerank  │
//!                  │  top RERANK_TOP          │
//!                  └────────────┬────────────┘
//!                               ▼
//!                  ┌─────────────────────────┐
//!                  │ Blend · boost · cap/file │
//!                  └────────────┬────────────┘
//!                               ▼
//!                  ┌─────────────────────────┐
//!                  │     Final Results        │
//!                  └─────────────────────────┘
//! ```
//!
//! The index pipeline walks the repository (VCS-aware, symlink-safe), diffs
//! it against the durable meta store, chunks changed files through the
//! external splitter, embeds batches through the worker pool, and upserts
//! into the external vector table.
//!
//! ## Module Overview
//!
//! - [`config`] - Tuning knobs (`OSGREP_*` overridable), pool sizing, home layout
//! - [`models`] - Chunk records, quantized matrices, meta entries, result shapes
//! - [`scan`] - Ignore-aware traversal and size/mtime/hash change detection
//! - [`cache`] - Bounded LRU memoization of text embeddings
//! - [`worker`] - Encoder worker pool: routing, timeouts, restart single-flight
//! - [`encode`] - Query encoder facade over the pool
//! - [`store`] - Interface required of the external vector store
//! - [`search`] - Hybrid retrieval, RRF fusion, two-stage rerank, score shaping
//! - [`meta`] - Crash-safe persisted file metadata (tmp-then-rename)
//! - [`engine`] - Orchestrator composing `search(query)` and `index(root)`
//! - [`eval`] - Reciprocal-rank / recall metrics for benchmark runs

pub mod cache;
pub mod config;
pub mod encode;
pub mod engine;
pub mod error;
pub mod eval;
pub mod meta;
pub mod models;
pub mod scan;
pub mod search;
pub mod store;
pub mod worker;

pub use config::Config;
pub use engine::{ChunkInput, Chunker, IndexStats, SearchEngine};
pub use error::CoreError;
pub use models::{ChunkRecord, ChunkType, SearchOptions, SearchResults};
pub use store::{ChunkStore, ChunkTable};
pub use worker::{Encoder, EncoderFactory, WorkerPool};
