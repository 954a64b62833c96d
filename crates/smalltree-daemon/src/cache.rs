use lru::LruCache;
use smalltree_protocol::GenerationOutcome;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(n) => n,
    None => unreachable!(),
};

/// LRU cache of successful generation outcomes, keyed by prompt.
pub struct ResponseCache {
    inner: LruCache<u64, CacheEntry>,
    ttl: Duration,
}

struct CacheEntry {
    outcome: GenerationOutcome,
    created_at: Instant,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY)),
            ttl,
        }
    }

    /// Build a cache key from the prompt text.
    pub fn cache_key(prompt: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        prompt.trim().hash(&mut hasher);
        hasher.finish()
    }

    /// Get a cached outcome, if it exists and hasn't expired.
    pub fn get(&mut self, key: u64) -> Option<GenerationOutcome> {
        if let Some(entry) = self.inner.get(&key) {
            if entry.created_at.elapsed() < self.ttl {
                return Some(entry.outcome.clone());
            }
            // Expired
            self.inner.pop(&key);
        }
        None
    }

    /// Store an outcome. Failures are never cached.
    pub fn put(&mut self, key: u64, outcome: GenerationOutcome) {
        if !outcome.success {
            return;
        }
        self.inner.put(
            key,
            CacheEntry {
                outcome,
                created_at: Instant::now(),
            },
        );
    }

    /// Number of entries in the cache.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_outcome() -> GenerationOutcome {
        GenerationOutcome::success(
            "Monday: chicken porridge with carrot".to_string(),
            "cohere",
            "command-r",
            vec!["cohere".to_string()],
        )
    }

    #[test]
    fn cache_put_and_get() {
        let mut cache = ResponseCache::new(10, Duration::from_secs(60));
        let key = ResponseCache::cache_key("weekly menu for 2-3 year olds");

        cache.put(key, make_outcome());
        let cached = cache.get(key);
        assert!(cached.is_some());
        assert_eq!(cached.unwrap().provider.as_deref(), Some("cohere"));
    }

    #[test]
    fn cache_miss() {
        let mut cache = ResponseCache::new(10, Duration::from_secs(60));
        assert!(cache.get(ResponseCache::cache_key("menu")).is_none());
    }

    #[test]
    fn failures_are_not_cached() {
        let mut cache = ResponseCache::new(10, Duration::from_secs(60));
        let key = ResponseCache::cache_key("menu");
        cache.put(key, GenerationOutcome::failure("down", vec![], vec![]));
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_are_dropped() {
        let mut cache = ResponseCache::new(10, Duration::ZERO);
        let key = ResponseCache::cache_key("menu");
        cache.put(key, make_outcome());
        assert!(cache.get(key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let mut cache = ResponseCache::new(2, Duration::from_secs(60));
        let (a, b, c) = (
            ResponseCache::cache_key("a"),
            ResponseCache::cache_key("b"),
            ResponseCache::cache_key("c"),
        );
        cache.put(a, make_outcome());
        cache.put(b, make_outcome());
        cache.get(a);
        cache.put(c, make_outcome());
        assert!(cache.get(a).is_some());
        assert!(cache.get(b).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn surrounding_whitespace_shares_a_key() {
        assert_eq!(
            ResponseCache::cache_key("menu\n"),
            ResponseCache::cache_key("  menu")
        );
        assert_ne!(ResponseCache::cache_key("menu"), ResponseCache::cache_key("curriculum"));
    }
}
