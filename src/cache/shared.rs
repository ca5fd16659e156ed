//! Thread-safe handle over [`AdaptiveCache`].
//!
//! Concurrent forward passes share one cache. A single mutex guards the whole
//! cache, so "check capacity, evict, insert" runs as one critical section and
//! can never interleave with another thread's insert. Critical sections hold
//! no await points, so a cancelled caller cannot leave a half-applied `put`.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::adaptive::{AdaptiveCache, CacheStats};
use crate::config::RuntimeConfig;
use crate::error::ConfigError;

/// Cloneable, shareable cache handle. Clones refer to the same cache.
pub struct SharedCache<K, V> {
    inner: Arc<Mutex<AdaptiveCache<K, V>>>,
}

impl<K, V> Clone for SharedCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> SharedCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(cache: AdaptiveCache<K, V>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(AdaptiveCache::from_config(config)?))
    }

    /// Cloned value for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &K, now: Duration) -> Option<V> {
        self.inner.lock().get(key, now).cloned()
    }

    /// Atomic evict-then-insert. Returns the evicted key, if any.
    pub fn put(&self, key: K, value: V, frequency: f64, now: Duration) -> Option<K> {
        self.inner.lock().put(key, value, frequency, now)
    }

    pub fn purge_expired(&self, now: Duration) -> usize {
        self.inner.lock().purge_expired(now)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }

    /// Run `f` with exclusive access to the underlying cache.
    pub fn with<R>(&self, f: impl FnOnce(&mut AdaptiveCache<K, V>) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }
}

impl<K, V> Debug for SharedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_tuple("SharedCache").field(&*inner).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relevance::retention::Retention;
    use std::thread;

    fn shared(capacity: usize) -> SharedCache<u64, Vec<f32>> {
        let cache = AdaptiveCache::new(capacity, Duration::from_secs(1), Retention::default())
            .expect("valid cache");
        SharedCache::new(cache)
    }

    #[test]
    fn test_clones_share_state() {
        let a = shared(4);
        let b = a.clone();
        a.put(1, vec![1.0], 100.0, Duration::ZERO);
        assert_eq!(b.get(&1, Duration::ZERO), Some(vec![1.0]));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_concurrent_puts_respect_capacity() {
        let cache = shared(16);
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..500u64 {
                        let key = t * 10_000 + i;
                        let freq = ((key * 31) % 1440) as f64;
                        cache.put(key, vec![i as f32], freq, Duration::from_millis(i));
                        assert!(cache.len() <= 16);
                        let _ = cache.get(&key, Duration::from_millis(i));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().expect("worker panicked");
        }

        let stats = cache.stats();
        assert_eq!(stats.len, 16);
        assert_eq!(stats.evictions, 8 * 500 - 16);
    }

    #[test]
    fn test_with_exposes_inner_cache() {
        let cache = shared(2);
        cache.put(7, vec![0.5], 10.0, Duration::ZERO);
        let freq = cache.with(|c| c.entry(&7).map(|e| e.frequency));
        assert_eq!(freq, Some(10.0));
    }

    #[test]
    fn test_from_config_rejects_zero_capacity() {
        let config = RuntimeConfig {
            cache_capacity: 0,
            ..Default::default()
        };
        let res: Result<SharedCache<u64, u32>, _> = SharedCache::from_config(&config);
        assert!(matches!(res, Err(ConfigError::ZeroCacheCapacity)));
    }
}
