//! Process-local, bounded, TTL-expiring cache.
//!
//! [`Cache`] is the shared primitive used by every higher layer (dedup
//! engine, reference counter, orchestrator) to avoid redundant catalog
//! reads. It never sits on the blob critical path: every operation is a
//! short, non-blocking critical section (`Get`/`Set`/`Delete` never await
//! I/O), matching §5's suspension-point contract.
//!
//! # Example
//!
//! ```
//! use attachments_core::cache::{Cache, CacheValue};
//! use attachments_core::config::CacheConfig;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let cache = Cache::new(CacheConfig::default());
//! cache.set("k", CacheValue::Text("v".to_string()), Duration::from_secs(60));
//! let (value, hit) = cache.get("k");
//! assert!(hit);
//! assert_eq!(value.unwrap().as_text(), Some("v"));
//! cache.close().await;
//! # });
//! ```

mod entry;
mod stats;

pub use entry::CacheValue;
pub use stats::CacheStats;

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use entry::CacheEntry;
use stats::StatsAccumulator;

use crate::config::CacheConfig;

/// Bounded, TTL-expiring, process-local key/value cache.
///
/// Data and statistics are protected by two distinct locks so that reading
/// stats never blocks a `Get` (§5's shared-resource policy for this
/// component).
pub struct Cache {
    config: CacheConfig,
    data: RwLock<HashMap<String, CacheEntry>>,
    stats: RwLock<StatsAccumulator>,
    shutdown: std::sync::Arc<Notify>,
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("entries", &self.data.read().map(|d| d.len()).unwrap_or(0))
            .finish()
    }
}

impl Cache {
    /// Creates a cache and starts its background reaper task.
    #[must_use]
    pub fn new(config: CacheConfig) -> std::sync::Arc<Self> {
        let cache = std::sync::Arc::new(Self {
            config,
            data: RwLock::new(HashMap::new()),
            stats: RwLock::new(StatsAccumulator::default()),
            shutdown: std::sync::Arc::new(Notify::new()),
            reaper: std::sync::Mutex::new(None),
        });
        cache.clone().spawn_reaper();
        cache
    }

    fn spawn_reaper(self: std::sync::Arc<Self>) {
        let interval = self.config.cleanup_interval;
        let shutdown = self.shutdown.clone();
        let cache = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        cache.reap_expired();
                    }
                    () = shutdown.notified() => {
                        debug!("cache reaper shutting down");
                        break;
                    }
                }
            }
        });
        *self.reaper.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    #[instrument(skip(self))]
    fn reap_expired(&self) {
        let now = Instant::now();
        let mut removed = 0u64;
        {
            let mut data = self.data.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            data.retain(|_, entry| {
                let expired = entry.is_expired(now);
                if expired {
                    removed += 1;
                }
                !expired
            });
        }
        if removed > 0 {
            let mut stats = self.stats.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            stats.evictions += removed;
            debug!(removed, "reaper evicted expired entries");
        }
    }

    /// Looks up `key`. Returns `(Some(value), true)` on a live hit,
    /// `(None, false)` on a miss or expired entry.
    ///
    /// An expired hit counts as a miss and schedules the entry for removal
    /// (removed immediately here, since the lookup already holds the write
    /// path information needed).
    #[must_use]
    pub fn get(&self, key: &str) -> (Option<CacheValue>, bool) {
        let start = Instant::now();
        let now = Instant::now();

        let result = {
            let data = self.data.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            match data.get(key) {
                Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
                _ => None,
            }
        };

        let hit = result.is_some();
        if result.is_none() {
            // Either missing or expired; if expired, remove it now.
            let mut data = self.data.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(entry) = data.get(key) {
                if entry.is_expired(now) {
                    data.remove(key);
                }
            }
        }

        let mut stats = self.stats.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if hit {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        stats.total_get_duration += start.elapsed();

        (result, hit)
    }

    /// Inserts `value` under `key` with the given TTL. `ttl = Duration::ZERO`
    /// uses the configured default TTL. Triggers eviction until both
    /// `entries <= max_size` and `memory <= max_memory` hold.
    pub fn set(&self, key: impl Into<String>, value: CacheValue, ttl: Duration) {
        let start = Instant::now();
        let ttl = if ttl.is_zero() {
            self.config.default_ttl
        } else {
            ttl
        };
        let entry = CacheEntry::new(value, ttl);

        {
            let mut data = self.data.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            data.insert(key.into(), entry);
        }

        self.evict_until_within_bounds();

        let mut stats = self.stats.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        stats.sets += 1;
        stats.total_set_duration += start.elapsed();
    }

    /// Evicts entries (nearest-expiry first) until both bounds hold.
    ///
    /// This is TTL-ordered eviction, not true LRU: the victim is the entry
    /// closest to its expiration time, not the least-recently-accessed one.
    /// See `SPEC_FULL.md` §9 for why this crate keeps that behavior rather
    /// than adding an access-time field.
    fn evict_until_within_bounds(&self) {
        let mut evicted = 0u64;
        loop {
            let mut data = self.data.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            let entries = data.len();
            let memory: usize = data.values().map(|e| e.size).sum();
            if entries <= self.config.max_size && memory <= self.config.max_memory {
                break;
            }
            let Some(victim_key) = data
                .iter()
                .min_by_key(|(_, entry)| entry.expiration_time)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            data.remove(&victim_key);
            evicted += 1;
        }
        if evicted > 0 {
            let mut stats = self.stats.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            stats.evictions += evicted;
        }
    }

    /// Removes `key`, if present.
    pub fn delete(&self, key: &str) {
        let removed = {
            let mut data = self.data.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            data.remove(key).is_some()
        };
        if removed {
            let mut stats = self.stats.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            stats.deletes += 1;
        }
    }

    /// Removes every entry. After this call, `entries == 0` and `current_memory == 0` (I10).
    pub fn clear(&self) {
        let mut data = self.data.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        data.clear();
    }

    /// Returns a snapshot of cache statistics.
    #[must_use]
    pub fn get_stats(&self) -> CacheStats {
        let data = self.data.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry_count = data.len();
        let current_memory = data.values().map(|e| e.size).sum();
        drop(data);
        let stats = self.stats.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        stats.snapshot(entry_count, current_memory)
    }

    /// Stops the reaper and waits for it to drain. Idempotent.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.shutdown.notify_waiters();
        let handle = self.reaper.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_cache() -> std::sync::Arc<Cache> {
        Cache::new(CacheConfig {
            cleanup_interval: Duration::from_secs(3600),
            ..CacheConfig::default()
        })
    }

    #[tokio::test]
    async fn test_set_then_get_before_ttl_is_hit() {
        let cache = test_cache();
        cache.set("a", CacheValue::Text("1".into()), Duration::from_secs(60));
        let (value, hit) = cache.get("a");
        assert!(hit);
        assert_eq!(value.unwrap().as_text(), Some("1"));
    }

    #[tokio::test]
    async fn test_get_after_ttl_expiry_is_miss() {
        let cache = test_cache();
        cache.set("a", CacheValue::Text("1".into()), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        let (value, hit) = cache.get("a");
        assert!(!hit);
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_get_missing_key_is_miss() {
        let cache = test_cache();
        let (value, hit) = cache.get("missing");
        assert!(!hit);
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_clear_resets_size_and_memory() {
        let cache = test_cache();
        cache.set("a", CacheValue::Bytes(vec![0; 100]), Duration::from_secs(60));
        cache.set("b", CacheValue::Bytes(vec![0; 100]), Duration::from_secs(60));
        cache.clear();
        let stats = cache.get_stats();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.current_memory, 0);
    }

    #[tokio::test]
    async fn test_eviction_by_memory_picks_nearest_expiry() {
        let cache = Cache::new(CacheConfig {
            max_memory: 300,
            max_size: 10_000,
            cleanup_interval: Duration::from_secs(3600),
            ..CacheConfig::default()
        });
        cache.set("a", CacheValue::Bytes(vec![0; 150]), Duration::from_secs(3600));
        cache.set("b", CacheValue::Bytes(vec![0; 150]), Duration::from_secs(3600));
        // a and b are both present, 300 bytes total.
        assert_eq!(cache.get_stats().entry_count, 2);

        // c pushes us over budget; a was inserted (and so expires) first, so it is evicted.
        cache.set("c", CacheValue::Bytes(vec![0; 100]), Duration::from_secs(3600));
        let stats = cache.get_stats();
        assert!(stats.current_memory <= 300);
        assert_eq!(stats.evictions, 1);
        assert!(!cache.get("a").1);
        assert!(cache.get("b").1);
        assert!(cache.get("c").1);
    }

    #[tokio::test]
    async fn test_delete_of_missing_key_does_not_increment_deletes() {
        let cache = test_cache();
        cache.delete("missing");
        assert_eq!(cache.get_stats().deletes, 0);
    }

    #[test]
    fn test_hit_rate_tracks_gets() {
        let cache = test_cache();
        cache.set("a", CacheValue::Text("1".into()), Duration::from_secs(60));
        cache.get("a");
        cache.get("missing");
        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let cache = test_cache();
        cache.close().await;
        cache.close().await;
    }

    #[tokio::test]
    async fn test_reaper_evicts_expired_entries_on_tick() {
        let cache = Cache::new(CacheConfig {
            cleanup_interval: Duration::from_millis(20),
            ..CacheConfig::default()
        });
        cache.set("a", CacheValue::Text("1".into()), Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.get_stats().entry_count, 0);
        cache.close().await;
    }
}
