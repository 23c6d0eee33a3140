//! Bounded pool of encoder workers with routing, timeouts, and
//! memory-triggered restarts.
//!
//! Each worker owns one loaded model instance on its own OS thread, so a
//! crash affects only that slot. The orchestrator talks to the pool through
//! per-worker request queues and one shared reply channel demultiplexed by
//! request id.

pub mod messages;
pub mod pool;

pub use messages::{Encoder, EncoderFactory};
pub use pool::WorkerPool;
