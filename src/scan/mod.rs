//! Repository scanning: ignore-aware traversal and change detection.

pub mod changes;
pub mod walker;

pub use changes::{detect_changes, ChangeSet};
pub use walker::Walker;
