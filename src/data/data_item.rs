//! Data items - variable-length records stored in data pages.
//!
//! # Layout
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       1     valid flag (0 = live, 1 = deleted)
//! 1       2     payload size (big-endian)
//! 3       size  payload
//! ```
//!
//! # Write protocol
//! A mutation never touches the page directly. It goes through a
//! [`DataItemWriter`] obtained from [`DataItem::before`]:
//!
//! ```text
//! before() ──► payload_mut(..) ──► after(wal, xid)     (logged, kept)
//!                              └─► undo_before()       (rolled back)
//! ```
//!
//! Dropping the writer without calling either also rolls back.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, Result, Uid, Xid};
use crate::recovery::{LogRecord, Wal};
use crate::storage::page::Page;

/// Flag byte of a live record.
pub const VALID: u8 = 0;

/// Flag byte of a deleted record.
pub const INVALID: u8 = 1;

/// Bytes in front of the payload.
pub const HEADER_SIZE: usize = 3;

/// Mark raw record bytes as deleted.
pub(crate) fn mark_invalid(raw: &mut [u8]) {
    raw[0] = INVALID;
}

/// A record pinned in memory.
///
/// The item keeps its page pinned until the data manager's cache evicts
/// it, so a `DataItem` is always safe to read.
///
/// # Thread Safety
/// `latch` admits many readers or one writer; a writer holds it for its
/// whole `before` .. `after` window.
pub struct DataItem {
    uid: Uid,
    page: Arc<Page>,
    /// Start of the record in the page.
    offset: usize,
    /// Total record length including the header.
    len: usize,
    latch: RwLock<()>,
}

impl DataItem {
    /// Encode `payload` as a fresh, live record.
    pub fn wrap(payload: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(HEADER_SIZE + payload.len());
        raw.push(VALID);
        raw.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        raw.extend_from_slice(payload);
        raw
    }

    /// View the record at `uid` in `page`.
    ///
    /// # Errors
    /// Returns `Error::NullEntry` if the offset or the recorded size points
    /// past the end of the page.
    pub fn parse(page: Arc<Page>, uid: Uid) -> Result<Self> {
        let offset = uid.offset() as usize;
        let len = {
            let data = page.read();
            if offset < 2 || offset + HEADER_SIZE > PAGE_SIZE {
                return Err(Error::NullEntry);
            }
            let size = u16::from_be_bytes([data[offset + 1], data[offset + 2]]) as usize;
            HEADER_SIZE + size
        };
        if offset + len > PAGE_SIZE {
            return Err(Error::NullEntry);
        }

        Ok(Self {
            uid,
            page,
            offset,
            len,
            latch: RwLock::new(()),
        })
    }

    #[inline]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// The page this item lives on.
    #[inline]
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// `false` once the record has been deleted.
    pub fn is_valid(&self) -> bool {
        let _shared = self.latch.read();
        self.page.read()[self.offset] == VALID
    }

    /// Run `f` over the payload under a shared latch.
    pub fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let _shared = self.latch.read();
        let data = self.page.read();
        f(&data[self.payload_range()])
    }

    /// Copy of the payload.
    pub fn payload(&self) -> Vec<u8> {
        self.with_payload(<[u8]>::to_vec)
    }

    /// Start a mutation: take the exclusive latch, mark the page dirty and
    /// save the current bytes.
    pub fn before(&self) -> DataItemWriter<'_> {
        let latch = self.latch.write();
        self.page.mark_dirty();
        let old_raw = self.raw();
        DataItemWriter {
            item: self,
            _latch: latch,
            old_raw,
            finished: false,
        }
    }

    fn raw(&self) -> Vec<u8> {
        self.page.read()[self.offset..self.offset + self.len].to_vec()
    }

    fn payload_range(&self) -> std::ops::Range<usize> {
        self.offset + HEADER_SIZE..self.offset + self.len
    }
}

impl std::fmt::Debug for DataItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataItem")
            .field("uid", &self.uid)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Exclusive write access to one [`DataItem`].
///
/// Holds the item's latch until it is consumed or dropped.
pub struct DataItemWriter<'a> {
    item: &'a DataItem,
    _latch: RwLockWriteGuard<'a, ()>,
    old_raw: Vec<u8>,
    finished: bool,
}

impl DataItemWriter<'_> {
    /// Mutate the payload in place.
    pub fn payload_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.item.page.write();
        f(&mut data[self.item.payload_range()])
    }

    /// Journal the change as an update record and release the latch.
    ///
    /// # Errors
    /// If the log append fails the saved image is restored before the
    /// error is returned.
    pub fn after(mut self, wal: &Wal, xid: Xid) -> Result<()> {
        let record = LogRecord::Update {
            xid,
            uid: self.item.uid,
            old_raw: self.old_raw.clone(),
            new_raw: self.item.raw(),
        };
        wal.append(&record.encode())?;
        self.finished = true;
        Ok(())
    }

    /// Put the saved image back and release the latch.
    pub fn undo_before(mut self) {
        self.restore();
        self.finished = true;
    }

    fn restore(&self) {
        let item = self.item;
        let mut data = item.page.write();
        data[item.offset..item.offset + item.len].copy_from_slice(&self.old_raw);
    }
}

impl Drop for DataItemWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.restore();
        }
    }
}
