//! Orchestrator composing traversal, change detection, the worker pool, the
//! store, and the ranking pipeline into `index(root)` and `search(query)`.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cache::VectorCache;
use crate::config::Config;
use crate::encode::QueryEncoder;
use crate::error::CoreError;
use crate::meta::MetaStore;
use crate::models::{
    chunk_id, content_hash, l2_normalize, ChunkRecord, ChunkType, GeneratedMetadata, ItemMetadata,
    SearchItem, SearchOptions, SearchResults,
};
use crate::scan::changes::stat_entry;
use crate::scan::{detect_changes, Walker};
use crate::search::shape::Ranked;
use crate::search::{
    late_interaction_rerank, pooled_prefilter, rrf_order, HybridRetriever, ScoreShaper,
};
use crate::store::{path_filter, path_prefix_filter, posix_normalize, ChunkStore, ChunkTable};
use crate::worker::{EncoderFactory, WorkerPool};

/// One chunk produced by the external structure-aware splitter.
#[derive(Debug, Clone, Default)]
pub struct ChunkInput {
    pub content: String,
    pub display_text: String,
    pub context_prev: String,
    pub context_next: String,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_type: ChunkType,
    pub is_anchor: bool,
}

/// External chunker contract. Paths are repo-relative and POSIX-normalized.
pub trait Chunker: Send + Sync {
    fn chunk(&self, path: &str, content: &str) -> Vec<ChunkInput>;
}

/// Statistics about one indexing pass.
#[derive(Debug, Default, Clone)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_deleted: usize,
    pub chunks_upserted: usize,
    pub duration_ms: u64,
}

pub struct SearchEngine {
    config: Config,
    store: Arc<dyn ChunkStore>,
    chunker: Arc<dyn Chunker>,
    pool: Arc<WorkerPool>,
    encoder: QueryEncoder,
    cache: Arc<VectorCache>,
    meta: MetaStore,
    retriever: HybridRetriever,
    shaper: ScoreShaper,
}

impl SearchEngine {
    /// Spawns the worker pool; must run inside a tokio runtime. An invalid
    /// configuration is the one failure surfaced to the caller here.
    pub fn new(
        config: Config,
        store: Arc<dyn ChunkStore>,
        chunker: Arc<dyn Chunker>,
        factory: Arc<dyn EncoderFactory>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let pool = Arc::new(WorkerPool::new(factory, config.pool.clone()));
        let cache = Arc::new(VectorCache::new(config.cache_capacity));
        let encoder = QueryEncoder::new(pool.clone(), cache.clone(), config.colbert_dim);
        let meta = MetaStore::load(&config.meta_path());
        let shaper = ScoreShaper::new(&config.scoring);

        Ok(Self {
            config,
            store,
            chunker,
            pool,
            encoder,
            cache,
            meta,
            retriever: HybridRetriever::new(),
            shaper,
        })
    }

    /// Hybrid search: encode, retrieve, rerank in two stages, shape,
    /// diversify. Degrades to an empty result on a missing table, missing
    /// FTS, zero candidates, or worker trouble; it does not fail for those.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        opts: &SearchOptions,
        path_prefix: Option<&str>,
    ) -> Result<SearchResults, CoreError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(SearchResults::default());
        }

        let encoding = match self.encoder.encode(query).await {
            Ok(encoding) => encoding,
            Err(err) => {
                warn!("query encoding failed, returning empty result: {err}");
                return Ok(SearchResults::default());
            }
        };

        let table = match self.store.ensure_table().await {
            Ok(table) => table,
            Err(err) => {
                warn!("store unavailable, returning empty result: {err}");
                return Ok(SearchResults::default());
            }
        };

        let scoring = &self.config.scoring;
        let candidates = self
            .retriever
            .retrieve(
                &table,
                &encoding.dense,
                query,
                scoring.pre_rerank_k(limit),
                scoring.stage1_k,
                path_prefix,
            )
            .await?;
        if candidates.is_empty() {
            return Ok(SearchResults::default());
        }

        let stage1 = pooled_prefilter(candidates, &encoding.pooled, scoring.stage2_k);
        let scored = if opts.rerank {
            late_interaction_rerank(&self.pool, &encoding.colbert, stage1, scoring.rerank_top)
                .await
        } else {
            rrf_order(stage1)
        };
        if scored.is_empty() {
            return Ok(SearchResults::default());
        }

        let ranked = self.shaper.shape(scored);
        let data = self
            .shaper
            .diversify(ranked, limit)
            .into_iter()
            .map(to_item)
            .collect();
        Ok(SearchResults { data })
    }

    /// Incremental index: traverse, diff against the meta store, re-embed
    /// added/modified files, drop deleted ones, persist the meta map.
    pub async fn index(&self, root: &Path) -> Result<IndexStats> {
        let start = Instant::now();
        let mut stats = IndexStats::default();

        let walker = Walker::new(root, &self.config.ignore_patterns)?;
        let files = walker.files();
        let previous = self.meta.snapshot();
        let changes = detect_changes(&previous, &files);
        info!(
            "indexing {}: {} added, {} modified, {} deleted",
            root.display(),
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len()
        );
        if changes.is_empty() {
            stats.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(stats);
        }

        let table = self.store.ensure_table().await?;

        // Deletions first: records and meta entry drop together, before any
        // subsequent query can observe a half-removed file.
        for key in &changes.deleted {
            let rel = relative_posix(root, Path::new(key));
            table
                .delete_where(&path_filter(&rel))
                .await
                .with_context(|| format!("delete records for {key}"))?;
            self.meta.delete(key);
            stats.files_deleted += 1;
        }

        for path in changes.added.iter().chain(changes.modified.iter()) {
            match self.index_file(root, path, &table).await {
                Ok(n) => {
                    stats.files_indexed += 1;
                    stats.chunks_upserted += n;
                }
                Err(err) => {
                    debug!("skipping {}: {err}", path.display());
                    stats.files_skipped += 1;
                }
            }
        }

        self.meta.save().await?;
        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!("index pass complete: {stats:?}");
        Ok(stats)
    }

    /// Purge all records and meta entries under a deleted directory.
    pub async fn purge(&self, root: &Path, dir: &Path) -> Result<()> {
        let table = self.store.ensure_table().await?;
        let mut rel = relative_posix(root, dir);
        if !rel.ends_with('/') {
            rel.push('/');
        }
        table.delete_where(&path_prefix_filter(&rel)).await?;
        self.meta.delete_by_prefix(&dir.to_string_lossy());
        self.meta.save().await
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    async fn index_file(
        &self,
        root: &Path,
        path: &Path,
        table: &Arc<dyn ChunkTable>,
    ) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let rel = relative_posix(root, path);
        let inputs = self.chunker.chunk(&rel, &content);
        let file_entry = stat_entry(path)?;
        let key = path.to_string_lossy();

        // Re-index replaces the file's records wholesale; ids are
        // deterministic, so surviving chunks keep their identity.
        table.delete_where(&path_filter(&rel)).await?;
        if inputs.is_empty() {
            self.meta.set(&key, file_entry);
            return Ok(0);
        }

        let mut encodings: Vec<_> = inputs.iter().map(|c| self.cache.get(&c.content)).collect();
        let missing: Vec<usize> = encodings
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_none())
            .map(|(i, _)| i)
            .collect();
        for batch in missing.chunks(self.config.embed_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|&i| inputs[i].content.clone()).collect();
            let embedded = self.pool.embed_batch(texts).await?;
            for (&i, enc) in batch.iter().zip(embedded) {
                self.cache.put(&inputs[i].content, enc.clone());
                encodings[i] = Some(enc);
            }
        }

        let mut records = Vec::with_capacity(inputs.len());
        for (i, (input, enc)) in inputs.into_iter().zip(encodings).enumerate() {
            let Some(mut enc) = enc else { continue };
            l2_normalize(&mut enc.dense);
            l2_normalize(&mut enc.pooled);
            let hash = content_hash(input.content.as_bytes());
            records.push(ChunkRecord {
                id: chunk_id(&rel, i as u32),
                path: rel.clone(),
                chunk_index: i as u32,
                hash,
                content: input.content,
                display_text: input.display_text,
                context_prev: input.context_prev,
                context_next: input.context_next,
                start_line: input.start_line.max(1),
                end_line: input.end_line.max(input.start_line.max(1)),
                chunk_type: input.chunk_type,
                is_anchor: input.is_anchor,
                vector: enc.dense,
                colbert: enc.colbert,
                pooled_colbert: enc.pooled,
                doc_token_ids: None,
            });
        }

        let count = records.len();
        table.upsert(records).await?;
        self.meta.set(&key, file_entry);
        Ok(count)
    }
}

fn to_item(ranked: Ranked) -> SearchItem {
    let rec = ranked.record;
    let body = if rec.display_text.is_empty() {
        &rec.content
    } else {
        &rec.display_text
    };
    let text = format!("{}{}{} ", rec.context_prev, body, rec.context_next);
    let num_lines = (rec.end_line.saturating_sub(rec.start_line) + 1).max(1);

    SearchItem {
        kind: "text",
        text,
        score: ranked.score,
        metadata: ItemMetadata {
            path: rec.path,
            hash: rec.hash,
            is_anchor: rec.is_anchor,
        },
        generated_metadata: GeneratedMetadata {
            start_line: rec.start_line,
            num_lines,
            chunk_type: rec.chunk_type,
        },
    }
}

fn relative_posix(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    posix_normalize(&rel.to_string_lossy())
}
