//! Write deduplication for low-cardinality registry rows.
//!
//! Services and operations are written with every span but change rarely.
//! [`DedupCache`] remembers, per key, the earliest time the row may be
//! written again. The cache is bounded; an evicted key only costs one extra
//! idempotent write.

use crate::core::Result;
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

/// Bounded map of key to next allowed write time.
pub struct DedupCache<K: Hash + Eq> {
    name: &'static str,
    entries: Mutex<LruCache<K, Instant>>,
    window: Duration,
}

impl<K: Hash + Eq + Debug> DedupCache<K> {
    pub fn new(name: &'static str, capacity: usize, window: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            window,
        }
    }

    /// True when the key has no entry or its window has passed.
    pub fn is_due(&self, key: &K) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(next_write) => Instant::now() > *next_write,
            None => true,
        }
    }

    /// Records a successful write of `key`.
    pub fn record(&self, key: K) {
        let next_write = Instant::now() + self.window;
        self.entries.lock().put(key, next_write);
    }

    /// Runs `write` unless `key` was written within the window. The key is
    /// recorded only when the write succeeds. Returns whether it ran.
    pub async fn run<F, Fut>(&self, key: K, write: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if !self.is_due(&key) {
            tracing::debug!("Skipping {} write for {:?}: within dedupe window", self.name, key);
            return Ok(false);
        }
        write().await?;
        self.record(key);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
