use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

/// Default worker memory budget before a slot restart is scheduled: 6 GiB.
pub const MAX_WORKER_RSS: u64 = 6 * 1024 * 1024 * 1024;

/// Reciprocal Rank Fusion constant.
pub const RRF_K: f32 = 60.0;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the on-disk layout, normally `$HOME/.osgrep`.
    pub home_dir: PathBuf,
    /// Extra ignore patterns (gitignore syntax) applied on top of
    /// `.osgrepignore`.
    pub ignore_patterns: Vec<String>,
    /// Capacity of the text -> embedding memoization cache.
    pub cache_capacity: usize,
    /// Chunk texts per embedding batch request.
    pub embed_batch_size: usize,
    /// Expected dense embedding dimension.
    pub dense_dim: usize,
    /// Expected late-interaction (per-token) dimension.
    pub colbert_dim: usize,
    /// Pooled projection dimension.
    pub pooled_dim: usize,
    pub scoring: ScoringConfig,
    pub pool: PoolConfig,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            home_dir: home.join(".osgrep"),
            ignore_patterns: Vec::new(),
            cache_capacity: 2048,
            embed_batch_size: 16,
            dense_dim: 768,
            colbert_dim: 128,
            pooled_dim: 48,
            scoring: ScoringConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.scoring = ScoringConfig::from_env();
        config
    }

    /// Downloaded encoder weights (managed externally).
    pub fn models_dir(&self) -> PathBuf {
        self.home_dir.join("models")
    }

    /// Vector store files.
    pub fn data_dir(&self) -> PathBuf {
        self.home_dir.join("data")
    }

    /// Tree-sitter wasm grammars (managed externally).
    pub fn grammars_dir(&self) -> PathBuf {
        self.home_dir.join("grammars")
    }

    /// Change-detection meta file; a `.tmp` sibling exists during writes.
    pub fn meta_path(&self) -> PathBuf {
        self.home_dir.join("meta.json")
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.dense_dim == 0 || self.colbert_dim == 0 || self.pooled_dim == 0 {
            return Err(CoreError::ConfigInvalid(
                "embedding dimensions must be positive".into(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(CoreError::ConfigInvalid(
                "cache capacity must be positive".into(),
            ));
        }
        if self.pool.size == 0 {
            return Err(CoreError::ConfigInvalid(
                "worker pool size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Retrieval and ranking knobs. Every field can be overridden with an
/// `OSGREP_*` environment variable; invalid or non-positive values fall back
/// to the defaults.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Override for the pre-rerank candidate pull; when unset,
    /// `max(5 * final_limit, 500)` is used.
    pub pre_k_override: Option<usize>,
    /// Fused candidates kept after RRF.
    pub stage1_k: usize,
    /// Candidates surviving the pooled-cosine prefilter.
    pub stage2_k: usize,
    /// Candidates scored by the late-interaction rerank.
    pub rerank_top: usize,
    /// Weight of the RRF score in the final blend.
    pub fused_weight: f32,
    /// Per-file cap applied during diversification.
    pub max_per_file: usize,
    pub anchor_penalty: f32,
    pub code_boost: f32,
    pub test_penalty: f32,
    pub doc_penalty: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            pre_k_override: None,
            stage1_k: 200,
            stage2_k: 40,
            rerank_top: 20,
            fused_weight: 0.5,
            max_per_file: 3,
            anchor_penalty: 0.99,
            code_boost: 1.05,
            test_penalty: 0.9,
            doc_penalty: 0.85,
        }
    }
}

impl ScoringConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.pre_k_override = env_usize("OSGREP_PRE_K");
        if let Some(v) = env_usize("OSGREP_STAGE1_K") {
            config.stage1_k = v;
        }
        if let Some(v) = env_usize("OSGREP_STAGE2_K") {
            config.stage2_k = v;
        }
        if let Some(v) = env_usize("OSGREP_RERANK_TOP") {
            config.rerank_top = v;
        }
        if let Some(v) = env_f32("OSGREP_RERANK_BLEND") {
            config.fused_weight = v;
        }
        if let Some(v) = env_usize("OSGREP_MAX_PER_FILE") {
            config.max_per_file = v;
        }
        if let Some(v) = env_f32("OSGREP_ANCHOR_PENALTY") {
            config.anchor_penalty = v;
        }
        if let Some(v) = env_f32("OSGREP_CODE_BOOST") {
            config.code_boost = v;
        }
        if let Some(v) = env_f32("OSGREP_TEST_PENALTY") {
            config.test_penalty = v;
        }
        if let Some(v) = env_f32("OSGREP_DOC_PENALTY") {
            config.doc_penalty = v;
        }
        config
    }

    /// Candidate pull for the hybrid stage.
    pub fn pre_rerank_k(&self, final_limit: usize) -> usize {
        self.pre_k_override
            .unwrap_or_else(|| (5 * final_limit).max(500))
    }
}

/// Worker pool sizing and supervision.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of encoder workers.
    pub size: usize,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// RSS above which a worker is restarted.
    pub max_worker_rss: u64,
    /// Grace period between shutdown message and detach.
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: num_cpus::get().saturating_sub(1).clamp(1, 4),
            request_timeout: Duration::from_secs(90),
            max_worker_rss: MAX_WORKER_RSS,
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let v: usize = std::env::var(name).ok()?.trim().parse().ok()?;
    (v > 0).then_some(v)
}

fn env_f32(name: &str) -> Option<f32> {
    let v: f32 = std::env::var(name).ok()?.trim().parse().ok()?;
    (v > 0.0 && v.is_finite()).then_some(v)
}
