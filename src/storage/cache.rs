//! Process-wide LRU cache for read-only segments
//!
//! Sealed segments are opened lazily on the read path; this cache bounds how
//! many of them stay open at once, which in turn bounds the process's open
//! file descriptors to `partitions + capacity` segment file pairs.
//!
//! Entries are keyed `"{topic}-{partition}-{base_offset}"` and held as
//! `Arc<Segment>`: the cache closes a segment when it evicts it, and a
//! reader that is mid-read at that moment finishes safely because the close
//! serializes behind the segment's internal read locks. The active segment
//! of a partition is never inserted here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::storage::segment::Segment;

/// Cache key for a segment: `"{topic}-{partition}-{base_offset}"`
pub fn cache_key(topic: &str, partition: i32, base_offset: i64) -> String {
    format!("{topic}-{partition}-{base_offset}")
}

struct CacheEntry {
    segment: Arc<Segment>,
    last_access: Instant,
}

/// LRU cache over open read-only segments
pub struct SegmentCache {
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SegmentCache {
    /// Create a cache bounded to `capacity` open segments (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached segment for `key`, loading it with `loader` on a
    /// miss. Evicts the least-recently-used entry when at capacity.
    ///
    /// The loader runs under the cache mutex: cold loads serialize, but
    /// eviction decisions stay race-free and a key is never loaded twice
    /// concurrently.
    pub fn get_or_load<F>(&self, key: &str, loader: F) -> Result<Arc<Segment>>
    where
        F: FnOnce() -> Result<Segment>,
    {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            entry.last_access = Instant::now();
            return Ok(Arc::clone(&entry.segment));
        }

        let segment = Arc::new(loader()?);

        if entries.len() >= self.capacity {
            evict_oldest(&mut entries);
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                segment: Arc::clone(&segment),
                last_access: Instant::now(),
            },
        );
        debug!(key, "segment cached");

        Ok(segment)
    }

    /// Peek at a cached segment without loading on miss.
    pub fn get(&self, key: &str) -> Option<Arc<Segment>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        entry.last_access = Instant::now();
        Some(Arc::clone(&entry.segment))
    }

    /// Remove and close the entry for `key`. Returns whether it was cached.
    pub fn evict(&self, key: &str) -> bool {
        let removed = self.entries.lock().remove(key);
        match removed {
            Some(entry) => {
                let _ = entry.segment.close();
                debug!(key, "segment evicted");
                true
            }
            None => false,
        }
    }

    /// Number of cached segments
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Close every cached segment and clear the cache.
    pub fn close(&self) {
        let mut entries = self.entries.lock();
        for (_, entry) in entries.drain() {
            let _ = entry.segment.close();
        }
    }
}

fn evict_oldest(entries: &mut HashMap<String, CacheEntry>) {
    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_access)
        .map(|(key, _)| key.clone());

    if let Some(key) = oldest {
        if let Some(entry) = entries.remove(&key) {
            let _ = entry.segment.close();
            debug!(key = %key, "segment evicted (lru)");
        }
    }
}
