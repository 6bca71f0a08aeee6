//! Log record payloads.
//!
//! The write-ahead log stores opaque byte strings; this module gives them
//! meaning. Two operations are journaled:
//!
//! ```text
//! Insert: [0][xid:8][page:4][offset:2][raw]
//! Update: [1][xid:8][uid:8][old image][new image]
//! ```
//!
//! The two images of an update are always the same length, so the split
//! point is the midpoint of the bytes after the uid.

use crate::common::{Error, PageId, Result, Uid, Xid};

const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

const INSERT_HEADER: usize = 1 + 8 + 4 + 2;
const UPDATE_HEADER: usize = 1 + 8 + 8;

/// A journaled change to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A record was appended to a page.
    Insert {
        xid: Xid,
        page_id: PageId,
        offset: u16,
        raw: Vec<u8>,
    },
    /// A record's bytes were replaced in place.
    Update {
        xid: Xid,
        uid: Uid,
        old_raw: Vec<u8>,
        new_raw: Vec<u8>,
    },
}

impl LogRecord {
    /// Serialize into the byte string handed to the log.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            LogRecord::Insert {
                xid,
                page_id,
                offset,
                raw,
            } => {
                let mut buf = Vec::with_capacity(INSERT_HEADER + raw.len());
                buf.push(TYPE_INSERT);
                buf.extend_from_slice(&xid.0.to_be_bytes());
                buf.extend_from_slice(&page_id.0.to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes());
                buf.extend_from_slice(raw);
                buf
            }
            LogRecord::Update {
                xid,
                uid,
                old_raw,
                new_raw,
            } => {
                debug_assert_eq!(old_raw.len(), new_raw.len());
                let mut buf = Vec::with_capacity(UPDATE_HEADER + old_raw.len() * 2);
                buf.push(TYPE_UPDATE);
                buf.extend_from_slice(&xid.0.to_be_bytes());
                buf.extend_from_slice(&uid.0.to_be_bytes());
                buf.extend_from_slice(old_raw);
                buf.extend_from_slice(new_raw);
                buf
            }
        }
    }

    /// Parse a byte string read back from the log.
    ///
    /// # Errors
    /// Returns `Error::BadLogFile` for an unknown tag, a truncated header
    /// or an update whose images cannot be split evenly.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (&tag, _) = buf.split_first().ok_or(Error::BadLogFile)?;
        match tag {
            TYPE_INSERT => {
                if buf.len() < INSERT_HEADER {
                    return Err(Error::BadLogFile);
                }
                Ok(LogRecord::Insert {
                    xid: Xid(read_u64(&buf[1..9])),
                    page_id: PageId(u32::from_be_bytes([buf[9], buf[10], buf[11], buf[12]])),
                    offset: u16::from_be_bytes([buf[13], buf[14]]),
                    raw: buf[INSERT_HEADER..].to_vec(),
                })
            }
            TYPE_UPDATE => {
                if buf.len() < UPDATE_HEADER || (buf.len() - UPDATE_HEADER) % 2 != 0 {
                    return Err(Error::BadLogFile);
                }
                let images = &buf[UPDATE_HEADER..];
                let (old_raw, new_raw) = images.split_at(images.len() / 2);
                Ok(LogRecord::Update {
                    xid: Xid(read_u64(&buf[1..9])),
                    uid: Uid(read_u64(&buf[9..17])),
                    old_raw: old_raw.to_vec(),
                    new_raw: new_raw.to_vec(),
                })
            }
            _ => Err(Error::BadLogFile),
        }
    }

    pub fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert { xid, .. } | LogRecord::Update { xid, .. } => *xid,
        }
    }

    /// The page this record touches.
    pub fn page_id(&self) -> PageId {
        match self {
            LogRecord::Insert { page_id, .. } => *page_id,
            LogRecord::Update { uid, .. } => uid.page_id(),
        }
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_insert_layout() {
        let record = LogRecord::Insert {
            xid: Xid(3),
            page_id: PageId(7),
            offset: 0x0102,
            raw: vec![0xAA, 0xBB],
        };
        let buf = record.encode();

        assert_eq!(buf[0], TYPE_INSERT);
        assert_eq!(&buf[1..9], &3u64.to_be_bytes());
        assert_eq!(&buf[9..13], &7u32.to_be_bytes());
        assert_eq!(&buf[13..15], &[0x01, 0x02]);
        assert_eq!(&buf[15..], &[0xAA, 0xBB]);
        assert_eq!(LogRecord::decode(&buf).unwrap(), record);
    }

    #[test]
    fn test_update_splits_at_midpoint() {
        let uid = Uid::new(PageId(4), 20);
        let record = LogRecord::Update {
            xid: Xid(9),
            uid,
            old_raw: vec![1, 2, 3],
            new_raw: vec![4, 5, 6],
        };

        let decoded = LogRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded.xid(), Xid(9));
        assert_eq!(decoded.page_id(), PageId(4));
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(LogRecord::decode(&[]), Err(Error::BadLogFile)));
        assert!(matches!(LogRecord::decode(&[7, 0, 0]), Err(Error::BadLogFile)));
        assert!(matches!(LogRecord::decode(&[TYPE_INSERT, 1]), Err(Error::BadLogFile)));

        let mut odd = vec![TYPE_UPDATE];
        odd.extend_from_slice(&[0u8; 16]);
        odd.push(1);
        assert!(matches!(LogRecord::decode(&odd), Err(Error::BadLogFile)));
    }

    proptest! {
        #[test]
        fn prop_decode_recovers_both_shapes(
            xid in any::<u64>(),
            page in 1u32..,
            offset in any::<u16>(),
            raw in proptest::collection::vec(any::<u8>(), 0..64),
            new_seed in any::<u8>(),
        ) {
            let insert = LogRecord::Insert {
                xid: Xid(xid),
                page_id: PageId(page),
                offset,
                raw: raw.clone(),
            };
            prop_assert_eq!(LogRecord::decode(&insert.encode()).unwrap(), insert);

            let new_raw: Vec<u8> = raw.iter().map(|b| b ^ new_seed).collect();
            let update = LogRecord::Update {
                xid: Xid(xid),
                uid: Uid::new(PageId(page), offset),
                old_raw: raw,
                new_raw,
            };
            prop_assert_eq!(LogRecord::decode(&update.encode()).unwrap(), update);
        }
    }
}
