//! Configuration constants for KestrelDB.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Size of a page in bytes (8KB).
///
/// # Memory Layout
/// With 8KB pages and 32-bit page numbers:
/// - Max pages: 2^32 - 1 (page numbers are 1-based)
/// - Max database size: just under 32TB
///
/// Record offsets are stored in 16 bits, so a page can never exceed 64KB.
pub const PAGE_SIZE: usize = 1 << 13;

/// Smallest page cache the store accepts, in pages.
pub const MIN_CACHE_PAGES: u64 = 10;

/// Default page cache budget in bytes (64MB).
pub const DEFAULT_MEMORY: u64 = 64 << 20;

/// Number of buckets in the free-space index.
pub const PAGE_INDEX_INTERVALS: usize = 40;

/// How many times an insert allocates a fresh page before giving up.
pub const INSERT_ATTEMPTS: usize = 5;

/// Suffix of the page file.
pub const DB_SUFFIX: &str = ".db";

/// Suffix of the write-ahead log.
pub const LOG_SUFFIX: &str = ".log";

/// Suffix of the transaction status file.
pub const XID_SUFFIX: &str = ".xid";

/// Append a file suffix to a base path (`data/bank` -> `data/bank.db`).
pub(crate) fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
