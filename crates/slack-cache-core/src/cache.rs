//! Bounded LRU cache with TTL, an optional byte ceiling and dispose hooks.
//!
//! [`BoundedCache`] is the building block for every cache in this crate. It
//! keeps entries in recency order, enforces a maximum entry count and,
//! optionally, a ceiling on the summed size reported by a caller-supplied
//! size calculator. Expired entries are dropped lazily on access and eagerly
//! by [`BoundedCache::purge_stale`].
//!
//! All operations are synchronous and run to completion under one lock, so
//! a single caller always observes a linear history. Concurrent writers to
//! the same key follow last-write-wins.
//!
//! Dispose callbacks run after the internal lock is released, so a callback
//! may safely call back into the cache.

use crate::config::BoundedCacheConfig;
use crate::{Error, Result};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Computes the size of a value for byte-ceiling accounting.
pub type SizeCalculator<K, V> = Arc<dyn Fn(&V, &K) -> Result<usize> + Send + Sync>;

/// Invoked whenever an entry leaves the cache.
pub type DisposeCallback<K, V> = Arc<dyn Fn(&V, &K, DisposeReason) + Send + Sync>;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisposeReason {
    /// Evicted to satisfy the entry-count or byte ceiling.
    Evict,
    /// Overwritten by a new value for the same key.
    Set,
    /// Removed explicitly (delete, clear, invalidation).
    Delete,
    /// Dropped because its TTL elapsed.
    Expire,
}

/// Per-call options for [`BoundedCache::set`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// TTL for this entry only; `Some(Duration::ZERO)` never expires.
    pub ttl: Option<Duration>,
}

impl SetOptions {
    /// Options with a TTL override.
    pub const fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    /// Start of the current TTL window; refreshed on read when `update_age_on_get`.
    touched_at: Instant,
    ttl: Option<Duration>,
    size: usize,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Option<Duration>, size: usize) -> Self {
        let now = Instant::now();
        Self {
            value,
            touched_at: now,
            ttl,
            size,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(self.touched_at) >= ttl)
    }
}

struct LruState<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    current_size: usize,
}

impl<K: Hash + Eq, V> LruState<K, V> {
    fn take(&mut self, key: &K) -> Option<(K, CacheEntry<V>)> {
        let (k, entry) = self.entries.pop_entry(key)?;
        self.current_size = self.current_size.saturating_sub(entry.size);
        Some((k, entry))
    }

    fn take_lru(&mut self) -> Option<(K, CacheEntry<V>)> {
        let (k, entry) = self.entries.pop_lru()?;
        self.current_size = self.current_size.saturating_sub(entry.size);
        Some((k, entry))
    }
}

#[derive(Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Snapshot of a cache's counters and occupancy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    /// Successful lookups.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Successful inserts and replacements.
    pub sets: u64,
    /// Explicit removals.
    pub deletes: u64,
    /// Entries dropped to satisfy the count or byte ceiling.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// `hits / (hits + misses) * 100`, or `0` without lookups.
    pub hit_rate: f64,
    /// Summed computed size of live entries in bytes.
    pub memory_usage: usize,
    /// Number of live entries.
    pub size: usize,
}

/// Percentage of hits over all lookups; `0.0` when nothing was looked up.
#[allow(clippy::cast_precision_loss)]
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}

/// LRU cache with TTL, entry-count and byte ceilings.
pub struct BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
{
    state: Mutex<LruState<K, V>>,
    config: BoundedCacheConfig,
    size_calculator: Option<SizeCalculator<K, V>>,
    dispose: Option<DisposeCallback<K, V>>,
    stats: CacheStats,
}

impl<K, V> fmt::Debug for BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCache")
            .field("config", &self.config)
            .field("len", &self.state.lock().entries.len())
            .finish_non_exhaustive()
    }
}

/// Builder for caches that need a size calculator or dispose hook.
pub struct BoundedCacheBuilder<K, V> {
    config: BoundedCacheConfig,
    size_calculator: Option<SizeCalculator<K, V>>,
    dispose: Option<DisposeCallback<K, V>>,
}

impl<K, V> BoundedCacheBuilder<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Attach a size calculator (required when `max_size` is set).
    #[must_use]
    pub fn size_calculator<F>(mut self, f: F) -> Self
    where
        F: Fn(&V, &K) -> Result<usize> + Send + Sync + 'static,
    {
        self.size_calculator = Some(Arc::new(f));
        self
    }

    /// Attach a dispose callback.
    #[must_use]
    pub fn on_dispose<F>(mut self, f: F) -> Self
    where
        F: Fn(&V, &K, DisposeReason) + Send + Sync + 'static,
    {
        self.dispose = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and build the cache.
    pub fn build(self) -> Result<BoundedCache<K, V>> {
        self.config.validate()?;
        if self.config.max_size.is_some() && self.size_calculator.is_none() {
            return Err(Error::Config(
                "max_size requires a size calculator".into(),
            ));
        }
        debug!(
            max = self.config.max,
            ttl_ms = self.config.ttl_ms,
            max_size = ?self.config.max_size,
            "created bounded cache"
        );
        Ok(BoundedCache {
            state: Mutex::new(LruState {
                entries: LruCache::unbounded(),
                current_size: 0,
            }),
            config: self.config,
            size_calculator: self.size_calculator,
            dispose: self.dispose,
            stats: CacheStats::default(),
        })
    }
}

type Disposed<K, V> = Vec<(K, V, DisposeReason)>;

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache without size calculator or dispose hook.
    pub fn new(config: BoundedCacheConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start building a cache.
    pub const fn builder(config: BoundedCacheConfig) -> BoundedCacheBuilder<K, V> {
        BoundedCacheBuilder {
            config,
            size_calculator: None,
            dispose: None,
        }
    }

    /// The configuration this cache was built with.
    pub const fn config(&self) -> &BoundedCacheConfig {
        &self.config
    }

    /// Insert or replace an entry.
    ///
    /// Returns `false` without inserting when the size calculator fails or
    /// when the entry alone exceeds `max_size`. Otherwise evicts
    /// least-recently-used entries until both ceilings hold.
    pub fn set(&self, key: K, value: V, options: SetOptions) -> bool {
        let size = match &self.size_calculator {
            Some(calc) => match calc(&value, &key) {
                Ok(size) => size,
                Err(e) => {
                    warn!(error = %e, "size calculation failed, entry not cached");
                    return false;
                },
            },
            None => 0,
        };

        if self.config.max_size.is_some_and(|max| size > max) {
            debug!(size, "entry larger than max_size, not cached");
            self.delete(&key);
            return false;
        }

        let ttl = match options.ttl {
            Some(ttl) if ttl.is_zero() => None,
            Some(ttl) => Some(ttl),
            None => self.config.default_ttl(),
        };

        let mut disposed: Disposed<K, V> = Vec::new();
        {
            let mut state = self.state.lock();
            if let Some((old_key, old)) = state.take(&key) {
                disposed.push((old_key, old.value, DisposeReason::Set));
            }
            state.entries.put(key, CacheEntry::new(value, ttl, size));
            state.current_size += size;

            while state.entries.len() > self.config.max {
                let Some((k, entry)) = state.take_lru() else {
                    break;
                };
                disposed.push((k, entry.value, DisposeReason::Evict));
            }
            if let Some(max_size) = self.config.max_size {
                while state.current_size > max_size && state.entries.len() > 1 {
                    let Some((k, entry)) = state.take_lru() else {
                        break;
                    };
                    disposed.push((k, entry.value, DisposeReason::Evict));
                }
            }
        }

        let evicted = disposed
            .iter()
            .filter(|(_, _, reason)| *reason == DisposeReason::Evict)
            .count() as u64;
        if evicted > 0 {
            self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(evicted, "evicted least-recently-used entries");
        }
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        self.run_dispose(disposed);
        true
    }

    /// Look up a live entry.
    ///
    /// Expired entries count as misses and are removed. With
    /// `update_age_on_get`, a hit promotes the entry to most-recently-used and
    /// restarts its TTL window.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut disposed: Disposed<K, V> = Vec::new();
        let result = {
            let mut state = self.state.lock();
            let expired = match state.entries.peek(key) {
                None => None,
                Some(entry) => Some(entry.is_expired(now)),
            };
            match expired {
                None => None,
                Some(true) => {
                    if let Some((k, entry)) = state.take(key) {
                        disposed.push((k, entry.value, DisposeReason::Expire));
                    }
                    None
                },
                Some(false) => {
                    let entry = if self.config.update_age_on_get {
                        state.entries.get_mut(key)
                    } else {
                        state.entries.peek_mut(key)
                    };
                    entry.map(|entry| {
                        if self.config.update_age_on_get {
                            entry.touched_at = now;
                        }
                        entry.value.clone()
                    })
                },
            }
        };

        if result.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        if !disposed.is_empty() {
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.run_dispose(disposed);
        result
    }

    /// Read an entry without promoting it or touching the metrics.
    pub fn peek(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .entries
            .peek(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Whether a live entry exists; never promotes.
    pub fn has(&self, key: &K) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Remove an entry, returning whether one was present.
    pub fn delete(&self, key: &K) -> bool {
        let removed = self.state.lock().take(key);
        match removed {
            Some((k, entry)) => {
                self.stats.deletes.fetch_add(1, Ordering::Relaxed);
                self.run_dispose(vec![(k, entry.value, DisposeReason::Delete)]);
                true
            },
            None => false,
        }
    }

    /// Remove every entry matching `predicate`, returning how many were removed.
    pub fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let disposed: Disposed<K, V> = {
            let mut state = self.state.lock();
            let keys: Vec<K> = state
                .entries
                .iter()
                .filter(|(k, entry)| predicate(*k, &entry.value))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter()
                .filter_map(|k| state.take(k))
                .map(|(k, entry)| (k, entry.value, DisposeReason::Delete))
                .collect()
        };
        let removed = disposed.len();
        self.stats
            .deletes
            .fetch_add(removed as u64, Ordering::Relaxed);
        self.run_dispose(disposed);
        removed
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let disposed: Disposed<K, V> = {
            let mut state = self.state.lock();
            let mut drained = Vec::with_capacity(state.entries.len());
            while let Some((k, entry)) = state.take_lru() {
                drained.push((k, entry.value, DisposeReason::Delete));
            }
            state.current_size = 0;
            drained
        };
        self.run_dispose(disposed);
    }

    /// Drop every expired entry, returning how many were dropped.
    pub fn purge_stale(&self) -> usize {
        let now = Instant::now();
        let disposed: Disposed<K, V> = {
            let mut state = self.state.lock();
            let keys: Vec<K> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter()
                .filter_map(|k| state.take(k))
                .map(|(k, entry)| (k, entry.value, DisposeReason::Expire))
                .collect()
        };
        let purged = disposed.len();
        if purged > 0 {
            self.stats
                .expirations
                .fetch_add(purged as u64, Ordering::Relaxed);
            debug!(purged, "purged stale entries");
        }
        self.run_dispose(disposed);
        purged
    }

    /// Keys from most- to least-recently-used, including not-yet-purged expired ones.
    pub fn keys(&self) -> Vec<K> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed computed size of stored entries.
    pub fn memory_usage(&self) -> usize {
        self.state.lock().current_size
    }

    /// Snapshot of counters and occupancy.
    pub fn get_metrics(&self) -> CacheMetrics {
        let (size, memory_usage) = {
            let state = self.state.lock();
            (state.entries.len(), state.current_size)
        };
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        CacheMetrics {
            hits,
            misses,
            sets: self.stats.sets.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses),
            memory_usage,
            size,
        }
    }

    /// Zero all counters; stored entries are untouched.
    pub fn reset_metrics(&self) {
        for counter in [
            &self.stats.hits,
            &self.stats.misses,
            &self.stats.sets,
            &self.stats.deletes,
            &self.stats.evictions,
            &self.stats.expirations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn run_dispose(&self, disposed: Disposed<K, V>) {
        if let Some(dispose) = &self.dispose {
            for (key, value, reason) in disposed {
                dispose(&value, &key, reason);
            }
        }
    }
}

/// Size of a value's JSON encoding, the default byte measure for cached records.
pub fn json_size<T: Serialize + ?Sized>(value: &T) -> Result<usize> {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .map_err(|e| Error::SizeCalculation(e.to_string()))
}
