//! Relevance-weighted cache with frequency-scaled lifetime.
//!
//! Each entry carries the relevance frequency of its value. That frequency
//! decides two things:
//! - lifetime: an entry expires once its age exceeds `τ₀ / max(κ(f), ε)`,
//!   checked lazily on `get`;
//! - eviction order: inserting a new key into a full cache first removes the
//!   entry with the lowest frequency (oldest first on ties).
//!
//! There is no background sweeper. All work happens on the calling thread.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::error::ConfigError;
use crate::relevance::retention::Retention;

/// A cached value with its relevance frequency and insertion time.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub frequency: f64,
    pub created_at: Duration,
    /// Insertion sequence number, last-resort eviction tie-break.
    seq: u64,
}

/// Cache counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AdaptiveCache: {}/{} entries, hit rate {:.1}% ({} hits, {} misses), {} evicted, {} expired",
            self.len,
            self.capacity,
            self.hit_rate() * 100.0,
            self.hits,
            self.misses,
            self.evictions,
            self.expirations,
        )
    }
}

/// Bounded `K → V` store; `len() <= capacity()` after every call.
pub struct AdaptiveCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    capacity: usize,
    tau0: Duration,
    retention: Retention,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<K, V> AdaptiveCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(capacity: usize, tau0: Duration, retention: Retention) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        if tau0.is_zero() {
            return Err(ConfigError::InvalidBaseLifetime(0.0));
        }
        let f_max = retention.f_max();
        if !(f_max.is_finite() && f_max > 0.0) {
            return Err(ConfigError::InvalidFrequencyRange(f_max));
        }
        let epsilon = retention.epsilon();
        if !(epsilon > 0.0 && epsilon <= 1.0) {
            return Err(ConfigError::InvalidRetentionEpsilon(epsilon));
        }
        Ok(Self {
            entries: HashMap::with_capacity(capacity.min(1 << 16)),
            capacity,
            tau0,
            retention,
            next_seq: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        })
    }

    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::new(config.cache_capacity, config.tau0(), Retention::from_config(config))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// τ(f) = τ₀ / max(κ(f), ε).
    pub fn persistence_time(&self, frequency: f64) -> Duration {
        self.retention.persistence_time(frequency, self.tau0)
    }

    /// True if `key` is absent or has outlived its persistence time at `now`.
    pub fn should_evict(&self, key: &K, now: Duration) -> bool {
        match self.entries.get(key) {
            Some(entry) => self.is_expired(entry, now),
            None => true,
        }
    }

    /// Look up `key`. An expired entry is removed and reported as a miss.
    pub fn get(&mut self, key: &K, now: Duration) -> Option<&V> {
        let expired = match self.entries.get(key) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            self.entries.remove(key);
            self.expirations += 1;
            self.misses += 1;
            tracing::debug!(?key, "cache entry expired");
            return None;
        }

        self.hits += 1;
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Insert or refresh `key`.
    ///
    /// A new key arriving at a full cache evicts the lowest-frequency entry
    /// first. Re-inserting an existing key replaces its value, frequency and
    /// timestamp in place. Returns the evicted key, if any.
    pub fn put(&mut self, key: K, value: V, frequency: f64, now: Duration) -> Option<K> {
        let frequency = self.retention.clamp_frequency(frequency);
        let mut evicted = None;

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            evicted = self.evict_lowest_frequency();
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key,
            CacheEntry {
                value,
                frequency,
                created_at: now,
                seq,
            },
        );
        evicted
    }

    /// Remove every entry that has expired at `now`.
    pub fn purge_expired(&mut self, now: Duration) -> usize {
        let before = self.entries.len();
        let tau0 = self.tau0;
        let retention = self.retention;
        self.entries.retain(|_, entry| {
            let ttl = retention.persistence_time(entry.frequency, tau0);
            now.saturating_sub(entry.created_at) <= ttl
        });
        let removed = before - self.entries.len();
        self.expirations += removed as u64;
        removed
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Borrow an entry without touching counters or expiry.
    pub fn entry(&self, key: &K) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
        }
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Duration) -> bool {
        now.saturating_sub(entry.created_at) > self.persistence_time(entry.frequency)
    }

    fn evict_lowest_frequency(&mut self) -> Option<K> {
        let victim = self
            .entries
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.frequency
                    .total_cmp(&b.frequency)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|(key, _)| key.clone())?;

        self.entries.remove(&victim);
        self.evictions += 1;
        tracing::debug!(key = ?victim, "evicted lowest-frequency cache entry");
        Some(victim)
    }
}

impl<K, V> Debug for AdaptiveCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("tau0", &self.tau0)
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}
