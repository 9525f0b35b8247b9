//! Cache statistics, tracked under a lock separate from the entry map so
//! that reading stats never blocks a `Get`.

use std::time::Duration;

/// Point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Number of `Get` calls that found a live entry.
    pub hits: u64,
    /// Number of `Get` calls that found no entry or an expired one.
    pub misses: u64,
    /// Number of `Set` calls.
    pub sets: u64,
    /// Number of explicit `Delete` calls.
    pub deletes: u64,
    /// Number of entries removed by eviction (memory/size pressure or reaper expiry).
    pub evictions: u64,
    /// Number of entries currently live.
    pub entry_count: usize,
    /// Approximate total memory (bytes) held by live entries.
    pub current_memory: usize,
}

impl CacheStats {
    /// Fraction of `Get` calls that were hits, in `[0.0, 1.0]`. `0.0` when there have been no gets.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Internal accumulator protected by its own lock.
#[derive(Debug, Default)]
pub(super) struct StatsAccumulator {
    pub(super) hits: u64,
    pub(super) misses: u64,
    pub(super) sets: u64,
    pub(super) deletes: u64,
    pub(super) evictions: u64,
    pub(super) total_get_duration: Duration,
    pub(super) total_set_duration: Duration,
}

impl StatsAccumulator {
    pub(super) fn snapshot(&self, entry_count: usize, current_memory: usize) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            sets: self.sets,
            deletes: self.deletes,
            evictions: self.evictions,
            entry_count,
            current_memory,
        }
    }
}
