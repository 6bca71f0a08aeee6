//! Page Store - cached, pinned access to the page file.
//!
//! The [`PageStore`] puts a [`Cache`] in front of a [`DiskManager`],
//! keyed by page number. Callers `fetch` a page (pinning it), read or
//! modify it, and `release` it exactly once. A dirty page is written back
//! when its last pin is released.
//!
//! # Example
//! ```no_run
//! use kestreldb::storage::PageStore;
//! use kestreldb::common::config::DEFAULT_MEMORY;
//!
//! let store = PageStore::create("/tmp/bank.db", DEFAULT_MEMORY)?;
//! let page_id = store.allocate(&[])?;
//!
//! let page = store.fetch(page_id)?;
//! page.write()[0] = 1;
//! page.mark_dirty();
//! store.release(&page)?; // written back here
//! # Ok::<(), kestreldb::Error>(())
//! ```

use std::path::Path;
use std::sync::Arc;

use crate::buffer::{Cache, CacheStats};
use crate::common::config::{MIN_CACHE_PAGES, PAGE_SIZE};
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;
use crate::storage::DiskManager;

/// Cached page file.
///
/// # Thread Safety
/// All methods take `&self`; share the store behind an `Arc`.
pub struct PageStore {
    cache: Cache<DiskManager>,
}

impl PageStore {
    /// Create a new page file at `path` with a cache of `memory` bytes.
    ///
    /// # Errors
    /// - `Error::MemTooSmall` if `memory` holds fewer than
    ///   `MIN_CACHE_PAGES` pages
    /// - `Error::FileExists` if the file is already there
    pub fn create<P: AsRef<Path>>(path: P, memory: u64) -> Result<Self> {
        let capacity = Self::capacity_for(memory)?;
        let disk = DiskManager::create(path)?;
        Ok(Self::with_disk(disk, capacity))
    }

    /// Open an existing page file.
    pub fn open<P: AsRef<Path>>(path: P, memory: u64) -> Result<Self> {
        let capacity = Self::capacity_for(memory)?;
        let disk = DiskManager::open(path)?;
        Ok(Self::with_disk(disk, capacity))
    }

    fn capacity_for(memory: u64) -> Result<usize> {
        let capacity = memory / PAGE_SIZE as u64;
        if capacity < MIN_CACHE_PAGES {
            return Err(Error::MemTooSmall);
        }
        Ok(capacity as usize)
    }

    fn with_disk(disk: DiskManager, capacity: usize) -> Self {
        Self {
            cache: Cache::new(disk, capacity),
        }
    }

    // ========================================================================
    // Public API: Page Access
    // ========================================================================

    /// Append a page initialized with `init`, written straight to disk.
    pub fn allocate(&self, init: &[u8]) -> Result<PageId> {
        self.disk().allocate_page(init)
    }

    /// Pin a page, reading it from disk on a cache miss.
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page does not exist
    /// - `Error::CacheFull` if every cache slot is pinned
    pub fn fetch(&self, page_id: PageId) -> Result<Arc<Page>> {
        self.cache.acquire(page_id.0 as u64)
    }

    /// Unpin a page. The last release writes it back if dirty.
    pub fn release(&self, page: &Page) -> Result<()> {
        self.cache.release(page.page_id().0 as u64)
    }

    /// Write a page through to disk now, independent of its pins.
    pub fn flush(&self, page: &Page) -> Result<()> {
        self.disk().flush(page)
    }

    // ========================================================================
    // Public API: Maintenance
    // ========================================================================

    /// Drop every page numbered above `max_page`. Recovery only.
    pub fn truncate(&self, max_page: u32) -> Result<()> {
        self.disk().truncate(max_page)
    }

    /// Number of pages in the file.
    pub fn page_count(&self) -> u32 {
        self.disk().page_count()
    }

    /// Write back every cached page and sync the file.
    pub fn close(&self) -> Result<()> {
        self.cache.close_all()?;
        self.disk().sync()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    /// Number of pinned pages.
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    fn disk(&self) -> &DiskManager {
        self.cache.source()
    }
}
