//! Data Manager - the record store.
//!
//! Ties the page store, free-space index and write-ahead log together
//! behind record-level operations:
//!
//! ```text
//!              DataManager
//!     ┌────────────┼──────────────┐
//!     ▼            ▼              ▼
//!  item cache   PageIndex        Wal
//!     │
//!     ▼
//!  PageStore ──► DiskManager
//! ```
//!
//! Files live next to each other under a common base path:
//! `<base>.db` for pages and `<base>.log` for the log.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::buffer::{Cache, CacheSource, CacheStats};
use crate::common::config::{suffixed, DB_SUFFIX, INSERT_ATTEMPTS, LOG_SUFFIX};
use crate::common::{Error, PageId, Result, Uid, Xid};
use crate::concurrency::TransactionLedger;
use crate::data::{DataItem, PageIndex};
use crate::recovery::{recover, LogRecord, Wal};
use crate::storage::page::{data_page, meta_page, Page};
use crate::storage::PageStore;

/// Loads data items for the item cache. Each cached item pins its page.
struct ItemSource {
    pages: PageStore,
}

impl CacheSource for ItemSource {
    type Item = DataItem;

    fn load(&self, key: u64) -> Result<DataItem> {
        let uid = Uid(key);
        // Page 1 holds the validity token, never records.
        if uid.page_id() == PageId::META {
            return Err(Error::NullEntry);
        }
        let page = self.pages.fetch(uid.page_id())?;
        match DataItem::parse(Arc::clone(&page), uid) {
            Ok(item) => Ok(item),
            Err(err) => {
                self.pages.release(&page)?;
                Err(err)
            }
        }
    }

    fn evict(&self, _key: u64, item: &DataItem) -> Result<()> {
        self.pages.release(item.page())
    }
}

/// Record store over one page file and one log.
///
/// # Thread Safety
/// All operations take `&self`. Concurrent inserts never share a page:
/// a page is checked out of the free-space index for the duration of an
/// insert.
pub struct DataManager {
    items: Cache<ItemSource>,
    wal: Wal,
    index: PageIndex,
    /// Validity page, pinned from open to close.
    meta: Arc<Page>,
}

impl DataManager {
    /// Create `<base>.db` and `<base>.log`.
    pub fn create<P: AsRef<Path>>(base: P, memory: u64) -> Result<Self> {
        let base = base.as_ref();
        let pages = PageStore::create(suffixed(base, DB_SUFFIX), memory)?;
        let wal = Wal::create(suffixed(base, LOG_SUFFIX))?;

        let meta_id = pages.allocate(&meta_page::init_raw())?;
        let meta = pages.fetch(meta_id)?;

        Ok(Self {
            items: Cache::new(ItemSource { pages }, 0),
            wal,
            index: PageIndex::new(),
            meta,
        })
    }

    /// Open `<base>.db` and `<base>.log`, recovering first if the last
    /// shutdown was not clean.
    ///
    /// # Errors
    /// - `Error::BadLogFile` if the log is corrupt beyond a bad tail
    /// - file errors if either file is missing or inaccessible
    pub fn open<P: AsRef<Path>>(base: P, memory: u64, ledger: &dyn TransactionLedger) -> Result<Self> {
        let base = base.as_ref();
        let pages = PageStore::open(suffixed(base, DB_SUFFIX), memory)?;
        let wal = Wal::open(suffixed(base, LOG_SUFFIX))?;

        let meta = pages.fetch(PageId::META)?;
        if !meta_page::check(&meta) {
            info!(path = %base.display(), "data.crash_detected");
            recover(ledger, &wal, &pages)?;
        }

        let index = PageIndex::new();
        for n in (PageId::META.0 + 1)..=pages.page_count() {
            let page = pages.fetch(PageId::new(n))?;
            index.add(page.page_id(), data_page::free_space(&page));
            pages.release(&page)?;
        }

        meta_page::set_open(&meta);
        pages.flush(&meta)?;
        debug!(pages = pages.page_count(), "data.open");

        Ok(Self {
            items: Cache::new(ItemSource { pages }, 0),
            wal,
            index,
            meta,
        })
    }

    // ========================================================================
    // Public API: Records
    // ========================================================================

    /// Pin the record at `uid`. Deleted records read as `None`.
    ///
    /// Every `Some` must be handed back through [`release`](Self::release).
    pub fn read(&self, uid: Uid) -> Result<Option<Arc<DataItem>>> {
        let item = self.items.acquire(uid.0)?;
        if !item.is_valid() {
            self.items.release(uid.0)?;
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Store `payload` as a new record on behalf of `xid`.
    ///
    /// The insert is journaled before the page is touched.
    ///
    /// # Errors
    /// - `Error::DataTooLarge` if the record cannot fit in an empty page
    /// - `Error::DatabaseBusy` if no page with room turned up after
    ///   `INSERT_ATTEMPTS` fresh allocations
    pub fn insert(&self, xid: Xid, payload: &[u8]) -> Result<Uid> {
        let raw = DataItem::wrap(payload);
        if raw.len() > data_page::MAX_FREE_SPACE {
            return Err(Error::DataTooLarge);
        }

        let mut selected = None;
        for _ in 0..INSERT_ATTEMPTS {
            selected = self.index.select(raw.len());
            if selected.is_some() {
                break;
            }
            let page_id = self.pages().allocate(&data_page::init_raw())?;
            self.index.add(page_id, data_page::MAX_FREE_SPACE);
        }
        let info = selected.ok_or(Error::DatabaseBusy)?;

        let page = match self.pages().fetch(info.page_id) {
            Ok(page) => page,
            Err(err) => {
                self.index.add(info.page_id, info.free_space);
                return Err(err);
            }
        };

        let result = self.insert_into(&page, xid, &raw);

        // Always file the page back, whatever happened.
        self.index.add(page.page_id(), data_page::free_space(&page));
        self.pages().release(&page)?;
        result
    }

    fn insert_into(&self, page: &Page, xid: Xid, raw: &[u8]) -> Result<Uid> {
        let record = LogRecord::Insert {
            xid,
            page_id: page.page_id(),
            offset: data_page::free_space_offset(&page.read()),
            raw: raw.to_vec(),
        };
        self.wal.append(&record.encode())?;

        let offset = data_page::insert(page, raw);
        Ok(Uid::new(page.page_id(), offset))
    }

    /// Unpin a record obtained from [`read`](Self::read).
    pub fn release(&self, item: &DataItem) -> Result<()> {
        self.items.release(item.uid().0)
    }

    // ========================================================================
    // Public API: Lifecycle
    // ========================================================================

    /// The write-ahead log, for journaling record updates.
    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    /// The underlying page store.
    pub fn pages(&self) -> &PageStore {
        &self.items.source().pages
    }

    /// Statistics of the record cache.
    pub fn item_stats(&self) -> &CacheStats {
        self.items.stats()
    }

    /// Shut down cleanly: write back everything and stamp the validity page.
    ///
    /// Dropping a `DataManager` without calling `close` is treated as a
    /// crash on the next open.
    pub fn close(&self) -> Result<()> {
        self.items.close_all()?;
        self.wal.close()?;

        meta_page::set_close(&self.meta);
        self.pages().release(&self.meta)?;
        self.pages().close()?;
        info!("data.close");
        Ok(())
    }
}
