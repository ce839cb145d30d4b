//! Bounded LRU embedding cache
//!
//! Wraps an [`Embedder`] with a cache keyed by a fast non-cryptographic
//! hash (xxh3) of the input text. The cache is transparent: wrapping an
//! embedder must not change result semantics, only latency.
//!
//! The read path takes the read lock and peeks without promoting; only a
//! hit upgrades to the write lock to promote the entry. Insertion is
//! double-checked: after computing an embedding outside the lock, the
//! entry is only inserted if a concurrent miss didn't beat us to it.

use lru::LruCache;
use nornic_core::Result;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

/// Anything that turns text into dense vectors.
pub trait Embedder: Send + Sync {
    /// Embedding dimension.
    fn dim(&self) -> usize;

    /// Embed one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch. The default delegates to [`Embedder::embed`] per
    /// text; implementations with real batch endpoints should override.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Cache statistics, read atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cache hits.
    pub hits: u64,
    /// Cache misses.
    pub misses: u64,
    /// Current entry count.
    pub len: usize,
    /// Configured capacity (0 = caching disabled).
    pub capacity: usize,
}

impl CacheStats {
    /// Hits over total lookups, 0.0 when no lookups happened.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// An [`Embedder`] wrapper with a bounded LRU cache.
pub struct CachedEmbedder<E> {
    inner: E,
    /// `None` when capacity is 0 (caching disabled).
    cache: Option<RwLock<LruCache<u64, Arc<Vec<f32>>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<E: Embedder> CachedEmbedder<E> {
    /// Wrap `inner` with a cache of `capacity` entries. Capacity 0
    /// disables caching entirely (every call passes through).
    pub fn new(inner: E, capacity: usize) -> Self {
        CachedEmbedder {
            inner,
            cache: NonZeroUsize::new(capacity).map(|c| RwLock::new(LruCache::new(c))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped embedder.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    fn lookup(&self, key: u64) -> Option<Arc<Vec<f32>>> {
        let cache = self.cache.as_ref()?;
        // Fast path: read lock, no promotion.
        let found = cache.read().peek(&key).cloned();
        if let Some(v) = found {
            // Promote under the write lock.
            cache.write().get(&key);
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(v)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    fn insert(&self, key: u64, value: Vec<f32>) -> Arc<Vec<f32>> {
        let Some(cache) = self.cache.as_ref() else {
            return Arc::new(value);
        };
        let mut guard = cache.write();
        // Double-check: a concurrent miss may have inserted already; keep
        // the existing entry so all callers share one allocation.
        if let Some(existing) = guard.get(&key) {
            return Arc::clone(existing);
        }
        let value = Arc::new(value);
        guard.put(key, Arc::clone(&value));
        value
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.cache.as_ref().map(|c| c.read().len()).unwrap_or(0),
            capacity: self.cache.as_ref().map(|c| c.read().cap().get()).unwrap_or(0),
        }
    }
}

impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = xxh3_64(text.as_bytes());
        if let Some(cached) = self.lookup(key) {
            return Ok((*cached).clone());
        }
        let computed = self.inner.embed(text)?;
        let shared = self.insert(key, computed);
        Ok((*shared).clone())
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indices: Vec<usize> = Vec::new();
        let mut miss_texts: Vec<String> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = xxh3_64(text.as_bytes());
            if let Some(cached) = self.lookup(key) {
                results[i] = Some((*cached).clone());
            } else {
                miss_indices.push(i);
                miss_texts.push(text.clone());
            }
        }

        if !miss_texts.is_empty() {
            let computed = self.inner.embed_batch(&miss_texts)?;
            for (i, vector) in miss_indices.into_iter().zip(computed) {
                let key = xxh3_64(texts[i].as_bytes());
                let shared = self.insert(key, vector);
                results[i] = Some((*shared).clone());
            }
        }

        Ok(results.into_iter().map(|r| r.expect("filled above")).collect())
    }
}
