//! Counters kept by every [`Cache`](super::Cache).
//!
//! Each layer owns one cache, so the page store, the record store and the
//! version manager report separately: a low hit rate on the entry cache
//! with a high one on the page cache means records are reparsed from
//! resident pages rather than read from disk.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters. Updated with relaxed atomics; the counters are
/// independent, so a snapshot may mix values from slightly different
/// moments.
///
/// # Example
/// ```
/// use kestreldb::CacheStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = CacheStats::default();
/// stats.cache_misses.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.snapshot().cache_misses, 1);
/// ```
#[derive(Debug, Default)]
pub struct CacheStats {
    /// `acquire` found the key resident and only bumped its pin count.
    pub cache_hits: AtomicU64,
    /// `acquire` started a load through the source.
    pub cache_misses: AtomicU64,
    /// The source evicted a resource successfully.
    pub evictions: AtomicU64,
    /// The source failed to load; the reserved slot was given back.
    pub load_failures: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            cache_hits: read(&self.cache_hits),
            cache_misses: read(&self.cache_misses),
            evictions: read(&self.evictions),
            load_failures: read(&self.load_failures),
        }
    }
}

/// Plain copy of [`CacheStats`] for assertions and log fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub load_failures: u64,
}

impl StatsSnapshot {
    /// Share of acquires served without a load, `None` before the first.
    pub fn hit_rate(&self) -> Option<f64> {
        let acquires = self.cache_hits + self.cache_misses;
        (acquires > 0).then(|| self.cache_hits as f64 / acquires as f64)
    }

    /// Resources currently loaded but not yet evicted, as far as the
    /// counters can tell.
    pub fn resident_estimate(&self) -> u64 {
        self.cache_misses
            .saturating_sub(self.load_failures)
            .saturating_sub(self.evictions)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} evictions={} load_failures={}",
            self.cache_hits, self.cache_misses, self.evictions, self.load_failures
        )?;
        if let Some(rate) = self.hit_rate() {
            write!(f, " hit_rate={:.1}%", rate * 100.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_copies_counters() {
        let stats = CacheStats::new();
        stats.cache_hits.fetch_add(3, Ordering::Relaxed);
        stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        stats.load_failures.fetch_add(1, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(
            snapshot,
            StatsSnapshot {
                cache_hits: 3,
                cache_misses: 1,
                evictions: 0,
                load_failures: 1,
            }
        );
        assert_eq!(snapshot.hit_rate(), Some(0.75));
        assert_eq!(snapshot.resident_estimate(), 0);
    }

    #[test]
    fn test_hit_rate_undefined_before_first_acquire() {
        let snapshot = CacheStats::new().snapshot();
        assert_eq!(snapshot.hit_rate(), None);
        assert_eq!(snapshot.to_string(), "hits=0 misses=0 evictions=0 load_failures=0");
    }

    #[test]
    fn test_display_includes_hit_rate() {
        let snapshot = StatsSnapshot {
            cache_hits: 1,
            cache_misses: 3,
            evictions: 2,
            load_failures: 0,
        };
        assert_eq!(snapshot.resident_estimate(), 1);
        assert_eq!(
            snapshot.to_string(),
            "hits=1 misses=3 evictions=2 load_failures=0 hit_rate=25.0%"
        );
    }
}
