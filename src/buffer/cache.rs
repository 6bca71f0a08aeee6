//! Reference-counted resource cache with single-flight loading.
//!
//! The [`Cache`] maps a 64-bit key to a shared resource. It knows nothing
//! about where resources come from: a [`CacheSource`] supplies the
//! "how to load" and "how to evict" halves.
//!
//! # Protocol
//! - `acquire(key)` pins the resource (refcount + 1), loading it on a miss
//! - `release(key)` unpins it; at refcount 0 the source evicts it
//! - every acquire must be matched by exactly one release

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use crate::buffer::CacheStats;
use crate::common::{Error, Result};

/// Backing store of a [`Cache`].
///
/// Both callbacks run without the cache's bookkeeping lock held, so a slow
/// load of one key never blocks acquires of unrelated keys.
pub trait CacheSource: Send + Sync {
    /// The cached resource.
    type Item: Send + Sync;

    /// Load the resource for `key` on a cache miss.
    fn load(&self, key: u64) -> Result<Self::Item>;

    /// Write back / tear down a resource whose refcount reached zero.
    fn evict(&self, key: u64, item: &Self::Item) -> Result<()>;
}

struct Slot<T> {
    item: Arc<T>,
    refs: usize,
}

struct CacheState<T> {
    /// Loaded resources and their reference counts.
    resident: HashMap<u64, Slot<T>>,
    /// Keys currently being loaded or evicted.
    in_flight: HashSet<u64>,
    /// Occupied capacity: resident plus in-flight keys.
    count: usize,
}

/// A bounded, reference-counted cache.
///
/// # Thread Safety
/// - `state`: one `Mutex` serializes all bookkeeping
/// - `settled`: waiters for an in-flight key sleep here until the
///   load or eviction of that key finishes
/// - `stats`: no lock, atomic counters
pub struct Cache<S: CacheSource> {
    source: S,
    state: Mutex<CacheState<S::Item>>,
    settled: Condvar,
    /// Maximum occupied slots, 0 = unbounded.
    capacity: usize,
    stats: CacheStats,
}

impl<S: CacheSource> Cache<S> {
    /// Create a cache over `source` holding at most `capacity` resources
    /// (0 = unbounded).
    pub fn new(source: S, capacity: usize) -> Self {
        Self {
            source,
            state: Mutex::new(CacheState {
                resident: HashMap::new(),
                in_flight: HashSet::new(),
                count: 0,
            }),
            settled: Condvar::new(),
            capacity,
            stats: CacheStats::new(),
        }
    }

    /// The backing source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Pin the resource for `key`, loading it if it is not resident.
    ///
    /// Concurrent callers for the same key share a single load.
    ///
    /// # Errors
    /// - `Error::CacheFull` if the key is not resident and no slot is free
    /// - any error returned by the source's loader
    pub fn acquire(&self, key: u64) -> Result<Arc<S::Item>> {
        {
            let mut state = self.state.lock();
            loop {
                if state.in_flight.contains(&key) {
                    self.settled.wait(&mut state);
                    continue;
                }

                if let Some(slot) = state.resident.get_mut(&key) {
                    slot.refs += 1;
                    self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Arc::clone(&slot.item));
                }

                if self.capacity > 0 && state.count >= self.capacity {
                    return Err(Error::CacheFull);
                }

                // Reserve the slot and claim the load.
                state.count += 1;
                state.in_flight.insert(key);
                break;
            }
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        trace!(key, "cache.load");
        let loaded = self.source.load(key);

        let result = {
            let mut state = self.state.lock();
            state.in_flight.remove(&key);
            match loaded {
                Ok(item) => {
                    let item = Arc::new(item);
                    state.resident.insert(
                        key,
                        Slot {
                            item: Arc::clone(&item),
                            refs: 1,
                        },
                    );
                    Ok(item)
                }
                Err(err) => {
                    state.count -= 1;
                    self.stats.load_failures.fetch_add(1, Ordering::Relaxed);
                    Err(err)
                }
            }
        };

        self.settled.notify_all();
        result
    }

    /// Unpin the resource for `key`. The last release evicts it.
    ///
    /// # Errors
    /// Returns the evictor's error. A resource whose eviction failed stays
    /// resident with no pins, so its state (a dirty page, say) is kept and
    /// the next release or `close_all` tries again.
    pub fn release(&self, key: u64) -> Result<()> {
        let item = {
            let mut state = self.state.lock();
            let remaining = match state.resident.get_mut(&key) {
                Some(slot) => {
                    // An unpinned slot is one whose eviction failed; retry it.
                    slot.refs = slot.refs.saturating_sub(1);
                    slot.refs
                }
                None => {
                    warn!(key, "cache.release_unknown_key");
                    return Ok(());
                }
            };
            if remaining > 0 {
                return Ok(());
            }

            let Some(slot) = state.resident.remove(&key) else {
                return Ok(());
            };
            // Hold the key in flight so nobody reloads it before write-back.
            state.in_flight.insert(key);
            slot.item
        };

        trace!(key, "cache.evict");
        let evicted = self.source.evict(key, &item);

        {
            let mut state = self.state.lock();
            state.in_flight.remove(&key);
            match &evicted {
                Ok(()) => {
                    state.count -= 1;
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(key, error = %err, "cache.evict_failed");
                    state.resident.insert(key, Slot { item, refs: 0 });
                }
            }
        }
        self.settled.notify_all();

        evicted
    }

    /// Evict every resident resource regardless of its refcount.
    ///
    /// Each key is handed to the evictor exactly once. Used at shutdown.
    ///
    /// # Errors
    /// Returns the first evictor error after attempting every key.
    pub fn close_all(&self) -> Result<()> {
        let drained: Vec<(u64, Arc<S::Item>)> = {
            let mut state = self.state.lock();
            let drained: Vec<_> = state
                .resident
                .drain()
                .map(|(key, slot)| (key, slot.item))
                .collect();
            for (key, _) in &drained {
                state.in_flight.insert(*key);
            }
            drained
        };

        let mut first_error = None;
        for (key, item) in &drained {
            match self.source.evict(*key, item) {
                Ok(()) => {
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(key, error = %err, "cache.close_evict_failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        {
            let mut state = self.state.lock();
            for (key, _) in &drained {
                state.in_flight.remove(key);
            }
            state.count -= drained.len();
        }
        self.settled.notify_all();

        first_error.map_or(Ok(()), Err)
    }

    /// Current refcount of `key`, or `None` if it is not resident.
    pub fn ref_count(&self, key: u64) -> Option<usize> {
        self.state.lock().resident.get(&key).map(|slot| slot.refs)
    }

    /// Number of resident resources.
    pub fn len(&self) -> usize {
        self.state.lock().resident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum occupied slots, 0 = unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    /// Source that hands out `key * 10` and records every call.
    #[derive(Default)]
    struct CountingSource {
        loads: AtomicUsize,
        evicted: Mutex<Vec<u64>>,
        delay: Option<Duration>,
        fail_key: Option<u64>,
        /// Evictions of this key fail while set.
        stuck_key: Mutex<Option<u64>>,
    }

    impl CacheSource for CountingSource {
        type Item = u64;

        fn load(&self, key: u64) -> Result<u64> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            if self.fail_key == Some(key) {
                return Err(Error::PageNotFound(key as u32));
            }
            Ok(key * 10)
        }

        fn evict(&self, key: u64, _item: &u64) -> Result<()> {
            if *self.stuck_key.lock() == Some(key) {
                return Err(Error::Io(std::io::ErrorKind::Other.into()));
            }
            self.evicted.lock().push(key);
            Ok(())
        }
    }

    #[test]
    fn test_acquire_hit_and_release() {
        let cache = Cache::new(CountingSource::default(), 0);

        assert_eq!(*cache.acquire(4).unwrap(), 40);
        assert_eq!(*cache.acquire(4).unwrap(), 40);
        assert_eq!(cache.ref_count(4), Some(2));
        assert_eq!(cache.source().loads.load(Ordering::SeqCst), 1);

        cache.release(4).unwrap();
        assert_eq!(cache.ref_count(4), Some(1));
        assert!(cache.source().evicted.lock().is_empty());

        cache.release(4).unwrap();
        assert_eq!(cache.ref_count(4), None);
        assert_eq!(*cache.source().evicted.lock(), vec![4]);

        let snapshot = cache.stats().snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.evictions, 1);
    }

    #[test]
    fn test_capacity_exhausted() {
        let cache = Cache::new(CountingSource::default(), 2);

        cache.acquire(1).unwrap();
        cache.acquire(2).unwrap();
        assert!(matches!(cache.acquire(3), Err(Error::CacheFull)));

        // Resident keys are still served when full.
        cache.acquire(1).unwrap();

        cache.release(2).unwrap();
        assert_eq!(*cache.acquire(3).unwrap(), 30);
    }

    #[test]
    fn test_failed_load_returns_slot() {
        let source = CountingSource {
            fail_key: Some(9),
            ..Default::default()
        };
        let cache = Cache::new(source, 1);

        assert!(matches!(cache.acquire(9), Err(Error::PageNotFound(9))));
        assert_eq!(cache.stats().snapshot().load_failures, 1);

        // The reservation was reverted, so the single slot is usable.
        assert_eq!(*cache.acquire(1).unwrap(), 10);
    }

    #[test]
    fn test_single_flight_load() {
        const THREADS: usize = 8;
        let source = CountingSource {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let cache = Arc::new(Cache::new(source, 0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    *cache.acquire(7).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 70);
        }

        assert_eq!(cache.source().loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.ref_count(7), Some(THREADS));
    }

    #[test]
    fn test_close_all_evicts_each_key_once() {
        let cache = Cache::new(CountingSource::default(), 0);

        cache.acquire(1).unwrap();
        cache.acquire(1).unwrap();
        cache.acquire(2).unwrap();

        cache.close_all().unwrap();

        let mut evicted = cache.source().evicted.lock().clone();
        evicted.sort_unstable();
        assert_eq!(evicted, vec![1, 2]);
        assert!(cache.is_empty());

        // Slots were freed: a bounded cache can load again.
        assert_eq!(*cache.acquire(3).unwrap(), 30);
    }

    #[test]
    fn test_failed_eviction_keeps_resource() {
        let source = CountingSource {
            stuck_key: Mutex::new(Some(5)),
            ..Default::default()
        };
        let cache = Cache::new(source, 1);

        cache.acquire(5).unwrap();
        assert!(matches!(cache.release(5), Err(Error::Io(_))));
        assert_eq!(cache.ref_count(5), Some(0));
        assert_eq!(cache.stats().snapshot().evictions, 0);

        // Still occupying the only slot, and served without a reload.
        assert!(matches!(cache.acquire(6), Err(Error::CacheFull)));
        assert_eq!(*cache.acquire(5).unwrap(), 50);
        assert_eq!(cache.source().loads.load(Ordering::SeqCst), 1);

        *cache.source().stuck_key.lock() = None;
        cache.release(5).unwrap();
        assert_eq!(cache.ref_count(5), None);
        assert_eq!(*cache.source().evicted.lock(), vec![5]);
        assert_eq!(*cache.acquire(6).unwrap(), 60);
    }

    #[test]
    fn test_release_unknown_key_is_ignored() {
        let cache = Cache::new(CountingSource::default(), 0);
        cache.release(99).unwrap();
        assert!(cache.source().evicted.lock().is_empty());
    }
}
