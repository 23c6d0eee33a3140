use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::models::Encoding;

/// Bounded text -> embedding memoization. Consulted before every embed
/// request; hits bypass the worker pool entirely. Hit paths are O(1) and
/// brief, so a plain mutex is enough under the single orchestrator task.
pub struct VectorCache {
    inner: Mutex<LruCache<String, Encoding>>,
}

impl VectorCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, text: &str) -> Option<Encoding> {
        self.inner.lock().get(text).cloned()
    }

    pub fn put(&self, text: &str, encoding: Encoding) {
        self.inner.lock().put(text.to_string(), encoding);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
