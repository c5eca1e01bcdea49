use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::core::error::Result;

pub const DEFAULT_CAPACITY: usize = 256;

/// Compiled filters keyed by query signature, so a query shape is only
/// compiled once per pool.
pub struct CompiledQueryCache<F> {
    cache: Mutex<LruCache<String, F>>,
    size_limit: usize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl<F: Clone> CompiledQueryCache<F> {
    pub fn new(size_limit: usize) -> Self {
        let cap = NonZeroUsize::new(size_limit).unwrap_or(NonZeroUsize::MIN);
        CompiledQueryCache {
            cache: Mutex::new(LruCache::new(cap)),
            size_limit: cap.get(),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    /// Cached filter for `signature`, compiling it on a miss. Compile
    /// errors are returned and nothing is cached.
    pub fn get_or_compile<C>(&self, signature: &str, compile: C) -> Result<F>
    where
        C: FnOnce() -> Result<F>,
    {
        if let Some(filter) = self.cache.lock().get(signature) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(filter.clone());
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);

        // compiled outside the lock; a racing miss just compiles twice
        let filter = compile()?;
        self.cache.lock().put(signature.to_string(), filter.clone());
        Ok(filter)
    }

    pub fn invalidate(&self, signature: &str) {
        self.cache.lock().pop(signature);
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.cache.lock().len(),
            capacity: self.size_limit,
        }
    }
}

impl<F: Clone> Default for CompiledQueryCache<F> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;

    #[test]
    fn second_lookup_hits() {
        let cache: CompiledQueryCache<String> = CompiledQueryCache::new(4);
        let first = cache.get_or_compile("sig", || Ok("compiled".to_string())).unwrap();
        let second = cache
            .get_or_compile("sig", || panic!("should not recompile"))
            .unwrap();
        assert_eq!(first, second);
        let stats = cache.stats();
        assert_eq!((stats.hit_count, stats.miss_count, stats.size), (1, 1, 1));
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn errors_are_not_cached() {
        let cache: CompiledQueryCache<String> = CompiledQueryCache::new(4);
        assert!(cache
            .get_or_compile("bad", || Err(Error::invalid_query("nope".to_string())))
            .is_err());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let cache: CompiledQueryCache<usize> = CompiledQueryCache::new(2);
        cache.get_or_compile("a", || Ok(1)).unwrap();
        cache.get_or_compile("b", || Ok(2)).unwrap();
        cache.get_or_compile("a", || Ok(0)).unwrap();
        cache.get_or_compile("c", || Ok(3)).unwrap();
        assert_eq!(cache.get_or_compile("a", || Ok(9)).unwrap(), 1);
        assert_eq!(cache.get_or_compile("b", || Ok(9)).unwrap(), 9);
    }
}
