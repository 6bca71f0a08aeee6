//! MVCC entries.
//!
//! An entry is a data item whose payload carries version stamps:
//!
//! ```text
//! [xmin:8][xmax:8][data]
//! ```
//!
//! `xmin` created the version; `xmax` deleted it, or is 0 while it is live.

use std::sync::Arc;

use crate::common::{Result, Uid, Xid};
use crate::data::DataItem;
use crate::recovery::Wal;

const XMIN: usize = 0;
const XMAX: usize = 8;
const DATA: usize = 16;

/// Smallest payload that is a well-formed entry.
pub(crate) const HEADER_SIZE: usize = DATA;

/// A versioned record pinned in the version manager's cache.
#[derive(Debug)]
pub struct Entry {
    uid: Uid,
    item: Arc<DataItem>,
}

impl Entry {
    pub fn new(uid: Uid, item: Arc<DataItem>) -> Self {
        Self { uid, item }
    }

    /// Payload for a fresh version of `data` created by `xid`.
    pub fn wrap(xid: Xid, data: &[u8]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(DATA + data.len());
        payload.extend_from_slice(&xid.0.to_be_bytes());
        payload.extend_from_slice(&Xid::NONE.0.to_be_bytes());
        payload.extend_from_slice(data);
        payload
    }

    #[inline]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// The underlying data item.
    pub fn item(&self) -> &Arc<DataItem> {
        &self.item
    }

    pub fn xmin(&self) -> Xid {
        self.item.with_payload(|p| read_xid(&p[XMIN..XMAX]))
    }

    pub fn xmax(&self) -> Xid {
        self.item.with_payload(|p| read_xid(&p[XMAX..DATA]))
    }

    /// Copy of the user data.
    pub fn data(&self) -> Vec<u8> {
        self.item.with_payload(|p| p[DATA..].to_vec())
    }

    /// Stamp this version as deleted by `xid`, journaled through `wal`.
    pub fn set_xmax(&self, xid: Xid, wal: &Wal) -> Result<()> {
        let mut writer = self.item.before();
        writer.payload_mut(|p| p[XMAX..DATA].copy_from_slice(&xid.0.to_be_bytes()));
        writer.after(wal, xid)
    }
}

fn read_xid(bytes: &[u8]) -> Xid {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Xid(u64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::DEFAULT_MEMORY;
    use crate::data::DataManager;
    use tempfile::tempdir;

    #[test]
    fn test_wrap_layout() {
        let payload = Entry::wrap(Xid(5), b"row");
        assert_eq!(&payload[..8], &5u64.to_be_bytes());
        assert_eq!(&payload[8..16], &[0u8; 8]);
        assert_eq!(&payload[16..], b"row");
    }

    #[test]
    fn test_stamps_and_delete() {
        let dir = tempdir().unwrap();
        let dm = DataManager::create(dir.path().join("db"), DEFAULT_MEMORY).unwrap();
        let uid = dm.insert(Xid(1), &Entry::wrap(Xid(1), b"row")).unwrap();

        let item = dm.read(uid).unwrap().unwrap();
        let entry = Entry::new(uid, item);
        assert_eq!(entry.uid(), uid);
        assert_eq!(entry.xmin(), Xid(1));
        assert_eq!(entry.xmax(), Xid::NONE);
        assert_eq!(entry.data(), b"row");

        entry.set_xmax(Xid(2), dm.wal()).unwrap();
        assert_eq!(entry.xmax(), Xid(2));
        assert_eq!(entry.data(), b"row");

        dm.release(entry.item()).unwrap();
    }
}
