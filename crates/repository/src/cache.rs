//! Bounded entity cache with TTL expiry and LRU eviction.
//!
//! One [`EntityCache`] belongs to one repository. Keys are
//! `"<collection>:<id>"`. Entries expire `ttl` after they were written:
//! lazily when a `get` finds them stale, and in bulk when
//! [`sweep_expired`](EntityCache::sweep_expired) runs, either on demand or
//! from the background [`CacheSweeper`].
//!
//! When an insert finds the cache full, the least recently used tenth of
//! the entries (at least one) is evicted first.
//!
//! A disabled cache (or one with a zero TTL) never stores anything, so
//! every read is a miss and every write is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::RepositoryConfig;
use crate::types::{EntityData, StoredEntity};

// ───────────────────────────────────────────────────────────────────────────
// Stats
// ───────────────────────────────────────────────────────────────────────────

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently held (expired entries not yet removed included).
    pub size: usize,
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Entries removed by expiry sweeps.
    pub cleanups: u64,
    /// `hits / (hits + misses)`, or 0 before the first lookup.
    pub hit_rate: f64,
}

// ───────────────────────────────────────────────────────────────────────────
// EntityCache
// ───────────────────────────────────────────────────────────────────────────

struct CacheEntry<T> {
    value: StoredEntity<T>,
    expires_at: Instant,
    last_accessed: Instant,
    access_seq: u64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    cleanups: u64,
}

impl<T> CacheState<T> {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// Per-repository entity cache.
pub struct EntityCache<T> {
    collection: String,
    enabled: bool,
    ttl: Duration,
    max_items: usize,
    state: Mutex<CacheState<T>>,
}

impl<T> std::fmt::Debug for EntityCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("collection", &self.collection)
            .field("enabled", &self.enabled)
            .field("ttl", &self.ttl)
            .field("max_items", &self.max_items)
            .field("size", &self.state.lock().entries.len())
            .finish()
    }
}

impl<T: EntityData> EntityCache<T> {
    /// Creates a cache from the repository configuration.
    pub fn new(config: &RepositoryConfig) -> Self {
        Self::with_settings(
            config.collection.clone(),
            config.cache_active(),
            config.cache_ttl,
            config.cache_max_items,
        )
    }

    /// Creates a cache with explicit settings.
    pub fn with_settings(
        collection: impl Into<String>,
        enabled: bool,
        ttl: Duration,
        max_items: usize,
    ) -> Self {
        Self {
            collection: collection.into(),
            enabled: enabled && !ttl.is_zero() && max_items > 0,
            ttl,
            max_items,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                seq: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                cleanups: 0,
            }),
        }
    }

    /// Returns `true` if the cache stores entries.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the entry TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.collection, id)
    }

    /// Looks up an entity. Expired entries are removed and reported as misses.
    pub fn get(&self, id: &str) -> Option<StoredEntity<T>> {
        if !self.enabled {
            return None;
        }
        let key = self.key(id);
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.entries.get(&key).map(|entry| entry.is_expired(now)) {
            None => {
                state.misses += 1;
                tracing::debug!(key = %key, "cache miss");
                return None;
            }
            Some(true) => {
                state.entries.remove(&key);
                state.misses += 1;
                tracing::debug!(key = %key, "cache entry expired");
                return None;
            }
            Some(false) => {}
        }

        let seq = state.next_seq();
        state.hits += 1;
        let entry = state.entries.get_mut(&key)?;
        entry.last_accessed = now;
        entry.access_seq = seq;
        tracing::debug!(key = %key, "cache hit");
        Some(entry.value.clone())
    }

    /// Stores an entity, evicting the least recently used entries if full.
    pub fn set(&self, entity: StoredEntity<T>) {
        if !self.enabled {
            return;
        }
        let key = self.key(entity.id());
        let now = Instant::now();
        let mut state = self.state.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_items {
            self.evict_lru(&mut state);
        }

        let seq = state.next_seq();
        state.entries.insert(
            key,
            CacheEntry {
                value: entity,
                expires_at: now + self.ttl,
                last_accessed: now,
                access_seq: seq,
            },
        );
    }

    fn evict_lru(&self, state: &mut CacheState<T>) {
        let count = (self.max_items / 10).max(1);
        let mut by_age: Vec<(Instant, u64, String)> = state
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_accessed, entry.access_seq, key.clone()))
            .collect();
        by_age.sort();

        for (_, _, key) in by_age.into_iter().take(count) {
            state.entries.remove(&key);
            state.evictions += 1;
        }
        tracing::debug!(collection = %self.collection, evicted = count, "cache eviction");
    }

    /// Removes one entity. Returns `true` if it was cached.
    pub fn delete(&self, id: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let key = self.key(id);
        self.state.lock().entries.remove(&key).is_some()
    }

    /// Removes several entities and returns how many were cached.
    pub fn delete_batch<I, S>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.enabled {
            return 0;
        }
        let keys: Vec<String> = ids.into_iter().map(|id| self.key(id.as_ref())).collect();
        let mut state = self.state.lock();
        keys.iter()
            .filter(|key| state.entries.remove(*key).is_some())
            .count()
    }

    /// Removes every entry and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.entries.len();
        state.entries.clear();
        count
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        let now = Instant::now();
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();
        state.cleanups += removed as u64;
        if removed > 0 {
            tracing::debug!(collection = %self.collection, removed, "cache sweep");
        }
        removed
    }

    /// Returns the number of held entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            size: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            cleanups: state.cleanups,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Background sweep
// ───────────────────────────────────────────────────────────────────────────

/// Handle to the background expiry sweep of one cache.
///
/// The task stops when [`shutdown`](Self::shutdown) is called, when the
/// handle is dropped, or when the cache itself is dropped.
#[derive(Debug)]
pub struct CacheSweeper {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CacheSweeper {
    /// Starts sweeping `cache` every `interval`.
    ///
    /// Returns `None` when there is nothing to sweep (disabled cache, zero
    /// interval) or when called outside a tokio runtime.
    pub fn spawn<T: EntityData>(cache: &Arc<EntityCache<T>>, interval: Duration) -> Option<Self> {
        if !cache.is_enabled() || interval.is_zero() {
            return None;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    collection = %cache.collection,
                    "no tokio runtime, cache expiry sweep disabled",
                );
                return None;
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let weak = Arc::downgrade(cache);
        let task = handle.spawn(sweep_loop(weak, interval, shutdown_rx));
        Some(Self { shutdown_tx, task })
    }

    /// Stops the task.
    pub fn shutdown(&self) {
        // The receiver may already be gone.
        let _ = self.shutdown_tx.send(true);
    }

    /// Returns `true` once the task has exited.
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn sweep_loop<T: EntityData>(
    cache: Weak<EntityCache<T>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else {
                    return;
                };
                cache.sweep_expired();
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}
