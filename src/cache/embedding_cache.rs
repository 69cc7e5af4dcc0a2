use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Cached {
    stored_at: Instant,
    embedding: Vec<f32>,
}

/// Thread-safe LRU cache of stored person embeddings, keyed by email.
///
/// Saves a graph store round trip for people queried repeatedly. Entries
/// expire `ttl` after they were stored, so a long-running server picks up
/// vectors rewritten by a later pipeline run. A capacity of 0 or a zero TTL
/// disables caching: every lookup misses and nothing is stored.
pub struct EmbeddingCache {
    cache: Option<Mutex<LruCache<String, Cached>>>,
    ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cache = if ttl.is_zero() {
            None
        } else {
            NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)))
        };
        Self { cache, ttl }
    }

    fn lock(&self) -> Option<MutexGuard<'_, LruCache<String, Cached>>> {
        self.cache
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached vector for `email`, refreshing its recency. Expired entries are
    /// dropped and reported as a miss.
    pub fn get(&self, email: &str) -> Option<Vec<f32>> {
        let mut cache = self.lock()?;
        let expired = cache.peek(email)?.stored_at.elapsed() >= self.ttl;
        if expired {
            cache.pop(email);
            return None;
        }
        cache.get(email).map(|c| c.embedding.clone())
    }

    pub fn put(&self, email: String, embedding: Vec<f32>) {
        if let Some(mut cache) = self.lock() {
            cache.put(
                email,
                Cached {
                    stored_at: Instant::now(),
                    embedding,
                },
            );
        }
    }

    /// Forget one person, e.g. after their vector was rewritten.
    pub fn invalidate(&self, email: &str) {
        if let Some(mut cache) = self.lock() {
            cache.pop(email);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Some(mut cache) = self.lock() {
            cache.clear();
        }
    }
}
