//! Synthesis cache: `(text, language)` → MP3 bytes.
//!
//! Repeated phrases ("Good morning.", meeting boilerplate) are common in
//! live sessions; caching synthesized audio keeps provider spend and
//! synthesis latency down. Bounded by entry count with FIFO eviction, safe
//! under concurrent readers and writers, torn down with the session.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info};

/// Maximum number of cached entries.
pub const MAX_ENTRIES: usize = 500;

/// Hit/miss counters, mirrored into logs at teardown.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl CacheMetrics {
    /// Snapshot as `(hits, misses, insertions, evictions)`.
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.insertions.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<(String, String), Bytes>,
    /// Insertion order for FIFO eviction.
    order: VecDeque<(String, String)>,
}

/// Bounded audio cache keyed by `(text, language_code)`.
#[derive(Debug)]
pub struct SynthesisCache {
    inner: RwLock<CacheInner>,
    capacity: usize,
    metrics: CacheMetrics,
}

impl Default for SynthesisCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthesisCache {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            capacity,
            metrics: CacheMetrics::default(),
        }
    }

    /// Returns the cached audio for `(text, language_code)`, if any.
    ///
    /// `Bytes` clones are reference-counted, so a hit hands back the exact
    /// bytes every time for the cache's lifetime.
    pub fn get(&self, text: &str, language_code: &str) -> Option<Bytes> {
        let inner = self.inner.read();
        let hit = inner
            .entries
            .get(&(text.to_string(), language_code.to_string()))
            .cloned();
        drop(inner);

        match hit {
            Some(audio) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Some(audio)
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts audio, evicting the oldest entry once the cache is full.
    /// Re-inserting an existing key refreshes the value without growing the
    /// cache.
    pub fn insert(&self, text: &str, language_code: &str, audio: Bytes) {
        let key = (text.to_string(), language_code.to_string());
        let mut inner = self.inner.write();

        if inner.entries.insert(key.clone(), audio).is_none() {
            inner.order.push_back(key);
            if inner.order.len() > self.capacity {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.entries.remove(&oldest);
                    self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(text = %oldest.0, language = %oldest.1, "evicted oldest cache entry");
                }
            }
        }

        self.metrics.insertions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry and logs the lifetime counters. Called on session
    /// teardown and shutdown.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.order.clear();
        drop(inner);

        let (hits, misses, insertions, evictions) = self.metrics.snapshot();
        info!(hits, misses, insertions, evictions, "synthesis cache cleared");
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_then_hit() {
        let cache = SynthesisCache::new();
        assert!(cache.get("Hello.", "en-US").is_none());

        cache.insert("Hello.", "en-US", Bytes::from_static(b"mp3"));
        assert_eq!(cache.get("Hello.", "en-US").unwrap(), Bytes::from_static(b"mp3"));

        let (hits, misses, ..) = cache.metrics().snapshot();
        assert_eq!((hits, misses), (1, 1));
    }

    #[test]
    fn test_key_includes_language() {
        let cache = SynthesisCache::new();
        cache.insert("Hello.", "en-US", Bytes::from_static(b"en"));
        cache.insert("Hello.", "es-ES", Bytes::from_static(b"es"));

        assert_eq!(cache.get("Hello.", "en-US").unwrap(), Bytes::from_static(b"en"));
        assert_eq!(cache.get("Hello.", "es-ES").unwrap(), Bytes::from_static(b"es"));
    }

    #[test]
    fn test_repeated_reads_return_identical_bytes() {
        let cache = SynthesisCache::new();
        cache.insert("Hi.", "en-US", Bytes::from_static(b"audio"));
        let first = cache.get("Hi.", "en-US").unwrap();
        let second = cache.get("Hi.", "en-US").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let cache = SynthesisCache::with_capacity(3);
        cache.insert("a", "en-US", Bytes::from_static(b"1"));
        cache.insert("b", "en-US", Bytes::from_static(b"2"));
        cache.insert("c", "en-US", Bytes::from_static(b"3"));
        cache.insert("d", "en-US", Bytes::from_static(b"4"));

        assert_eq!(cache.len(), 3);
        assert!(cache.get("a", "en-US").is_none(), "oldest entry evicted");
        assert!(cache.get("d", "en-US").is_some());
    }

    #[test]
    fn test_reinsert_does_not_grow_or_evict() {
        let cache = SynthesisCache::with_capacity(2);
        cache.insert("a", "en-US", Bytes::from_static(b"1"));
        cache.insert("b", "en-US", Bytes::from_static(b"2"));
        cache.insert("a", "en-US", Bytes::from_static(b"1b"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a", "en-US").unwrap(), Bytes::from_static(b"1b"));
        assert!(cache.get("b", "en-US").is_some());
    }

    #[test]
    fn test_clear() {
        let cache = SynthesisCache::new();
        cache.insert("a", "en-US", Bytes::from_static(b"1"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(SynthesisCache::new());
        let mut handles = Vec::new();

        for worker in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let text = format!("phrase-{}", i % 50);
                    if worker % 2 == 0 {
                        cache.insert(&text, "en-US", Bytes::from(vec![worker as u8]));
                    } else {
                        let _ = cache.get(&text, "en-US");
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= MAX_ENTRIES);
    }
}
