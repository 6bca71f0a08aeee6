//! Page - the fundamental 8KB unit of storage.
//!
//! A [`Page`] is an in-memory copy of one on-disk page plus the bookkeeping
//! the page store needs to write it back: its number and a dirty flag.
//! Pages are shared through the page store's cache as `Arc<Page>`.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::config::PAGE_SIZE;
use crate::common::PageId;

/// A cached page.
///
/// # Thread Safety
/// - `data`: `RwLock` gives many concurrent readers or one writer
/// - `dirty`: atomic, set by writers, cleared after write-back
///
/// # Example
/// ```
/// use kestreldb::storage::page::Page;
/// use kestreldb::PageId;
///
/// let page = Page::new(PageId::new(2));
/// page.write()[0] = 0xFF;
/// page.mark_dirty();
/// assert_eq!(page.read()[0], 0xFF);
/// assert!(page.is_dirty());
/// ```
pub struct Page {
    id: PageId,
    data: RwLock<Box<[u8]>>,
    dirty: AtomicBool,
}

impl Page {
    /// Create a zeroed page.
    pub fn new(id: PageId) -> Self {
        Self::from_bytes(id, vec![0u8; PAGE_SIZE].into_boxed_slice())
    }

    /// Wrap bytes read from disk. `data` must be exactly `PAGE_SIZE` long.
    pub fn from_bytes(id: PageId, data: Box<[u8]>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            id,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.id
    }

    /// Shared access to the page bytes.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Exclusive access to the page bytes.
    ///
    /// Does not mark the page dirty; callers that change bytes call
    /// [`mark_dirty`](Self::mark_dirty).
    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    #[inline]
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    #[inline]
    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_new() {
        let page = Page::new(PageId::new(3));
        assert_eq!(page.page_id(), PageId::new(3));
        assert_eq!(page.read().len(), PAGE_SIZE);
        assert_eq!(page.read()[0], 0);
        assert_eq!(page.read()[PAGE_SIZE - 1], 0);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_page_read_write() {
        let page = Page::new(PageId::new(2));
        {
            let mut data = page.write();
            data[0] = 0xFF;
            data[100] = 0xAB;
            data[PAGE_SIZE - 1] = 0xCD;
        }

        let data = page.read();
        assert_eq!(data[0], 0xFF);
        assert_eq!(data[100], 0xAB);
        assert_eq!(data[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn test_page_dirty_flag() {
        let page = Page::new(PageId::new(2));
        page.mark_dirty();
        assert!(page.is_dirty());
        page.clear_dirty();
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_page_concurrent_readers() {
        let page = Page::new(PageId::new(2));
        let r1 = page.read();
        let r2 = page.read();
        assert_eq!(r1[0], r2[0]);
    }
}
