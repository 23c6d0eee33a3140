use std::time::Duration;
use thiserror::Error;

/// Error kinds the retrieval core distinguishes.
///
/// Transient worker errors fail a single request or slot; recoverable store
/// errors degrade the query instead of failing it. Only `ConfigInvalid` is
/// surfaced to callers unconditionally.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("worker request timed out after {0:?}")]
    WorkerTimeout(Duration),

    #[error("worker {slot} crashed: {reason}")]
    WorkerCrash { slot: usize, reason: String },

    #[error("worker {0} is restarting; request rejected")]
    WorkerRestarting(usize),

    #[error("worker {slot} over memory budget ({rss_bytes} bytes)")]
    WorkerMemoryPressure { slot: usize, rss_bytes: u64 },

    #[error("worker request failed: {0}")]
    WorkerFailed(String),

    #[error("worker pool is shut down")]
    PoolShutdown,

    #[error("full-text index unavailable: {0}")]
    FtsUnavailable(String),

    #[error("vector table unavailable: {0}")]
    StoreMissing(String),

    #[error("meta file corrupt: {0}")]
    CorruptMeta(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl CoreError {
    /// Whether a search should degrade to an empty/shorter result instead of
    /// propagating this error to the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::ConfigInvalid(_))
    }
}
