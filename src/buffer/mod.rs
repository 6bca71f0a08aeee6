//! Caching layer.
//!
//! A generic reference-counted cache sits between every layer and the
//! thing below it: the page store caches pages read from disk, the data
//! manager caches records parsed from pages, and the version manager
//! caches MVCC entries wrapped around records.
//!
//! # Components
//! - [`Cache`] - Single-flight, reference-counted resource cache
//! - [`CacheSource`] - Pluggable load/evict behavior
//! - [`CacheStats`] - Performance statistics

mod cache;
mod stats;

pub use cache::{Cache, CacheSource};
pub use stats::{CacheStats, StatsSnapshot};
