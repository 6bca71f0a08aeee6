//! Write-ahead log.
//!
//! An append-only file of checksummed records:
//!
//! ```text
//! ┌────────────────┬──────────┬──────────┬─────┬──────────┐
//! │ header (4)     │ record 1 │ record 2 │ ... │ bad tail │
//! │ rolling cksum  │          │          │     │ (crash)  │
//! └────────────────┴──────────┴──────────┴─────┴──────────┘
//!
//! record = [size:4][checksum:4][data:size]
//! ```
//!
//! Each record's checksum covers its `data`. The header checksum is
//! folded over every complete framed record in append order and rewritten
//! after each append.
//!
//! On open, records are replayed until the first one that is cut short or
//! fails its own checksum. Everything from there on is a bad tail (a
//! crash mid-append) and is cut off. An append syncs its record before
//! rewriting the header, so the header can lag the records by at most the
//! last one; such a record was never acknowledged and is cut off too. Any
//! other disagreement with the header means the log itself is corrupt and
//! opening fails.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{error, trace, warn};

use crate::common::{Error, Result};

/// Multiplier of the rolling checksum.
const SEED: i32 = 13331;

/// Size of the file header holding the rolling checksum.
const HEADER_SIZE: u64 = 4;

/// `[size:4][checksum:4]` in front of every record.
const FRAME_HEADER: usize = 8;

/// Fold `data` into a running checksum.
pub(crate) fn checksum(seed: i32, data: &[u8]) -> i32 {
    data.iter().fold(seed, |acc, &b| {
        acc.wrapping_mul(SEED).wrapping_add(b as i8 as i32)
    })
}

struct WalInner {
    file: File,
    /// Read cursor for `next`.
    position: u64,
    /// End of the last valid record.
    file_size: u64,
    /// Rolling checksum of every record, mirrored in the header.
    checksum: i32,
}

/// The write-ahead log.
///
/// # Thread Safety
/// One `Mutex` serializes appends, reads and truncation, so the header
/// checksum always matches the records that precede the write cursor.
pub struct Wal {
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Create an empty log at `path`.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if the file is already there.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| Error::from_open(path, e))?;

        file.write_all(&0i32.to_be_bytes())?;
        file.sync_all()?;

        Ok(Self {
            inner: Mutex::new(WalInner {
                file,
                position: HEADER_SIZE,
                file_size: HEADER_SIZE,
                checksum: 0,
            }),
        })
    }

    /// Open an existing log, truncating any bad tail.
    ///
    /// # Errors
    /// - `Error::FileNotExists` if the file is missing
    /// - `Error::BadLogFile` if the file is shorter than its header or the
    ///   header checksum disagrees with the valid records
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::from_open(path, e))?;

        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE {
            error!(file_size, "wal.header_missing");
            return Err(Error::BadLogFile);
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let expected = i32::from_be_bytes(header);

        let mut position = HEADER_SIZE;
        let mut rolling = 0i32;
        // End and checksum of the log without its last record.
        let mut previous = (position, rolling);
        while let Some(frame) = read_frame(&mut file, position, file_size)? {
            previous = (position, rolling);
            rolling = checksum(rolling, &frame);
            position += frame.len() as u64;
        }

        if rolling != expected {
            if previous.0 < position && previous.1 == expected {
                warn!(offset = previous.0, "wal.drop_unacknowledged_append");
                (position, rolling) = previous;
            } else {
                error!(expected, actual = rolling, "wal.checksum_mismatch");
                return Err(Error::BadLogFile);
            }
        }

        if position < file_size {
            warn!(
                valid_len = position,
                dropped = file_size - position,
                "wal.truncate_bad_tail"
            );
            cut(&file, position)?;
        }

        Ok(Self {
            inner: Mutex::new(WalInner {
                file,
                position: HEADER_SIZE,
                file_size: position,
                checksum: rolling,
            }),
        })
    }

    // ========================================================================
    // Public API: Writing
    // ========================================================================

    /// Frame `data`, append it, and rewrite the header checksum.
    ///
    /// Both writes are durable when this returns.
    pub fn append(&self, data: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(FRAME_HEADER + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
        frame.extend_from_slice(&checksum(0, data).to_be_bytes());
        frame.extend_from_slice(data);

        let mut inner = self.inner.lock();
        let offset = inner.file_size;
        let rolling = checksum(inner.checksum, &frame);

        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&frame)?;
        // The record must be durable before the header vouches for it.
        inner.file.sync_data()?;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&rolling.to_be_bytes())?;
        inner.file.sync_all()?;

        inner.file_size = offset + frame.len() as u64;
        inner.checksum = rolling;
        trace!(offset, len = data.len(), "wal.append");
        Ok(())
    }

    /// Cut the file to exactly `len` bytes.
    pub fn truncate(&self, len: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        cut(&inner.file, len)?;
        inner.file_size = len;
        inner.position = inner.position.min(len);
        Ok(())
    }

    // ========================================================================
    // Public API: Reading
    // ========================================================================

    /// Move the read cursor back to the first record.
    pub fn rewind(&self) {
        self.inner.lock().position = HEADER_SIZE;
    }

    /// Return the data of the record under the cursor and advance it.
    ///
    /// Returns `None` after the last valid record.
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let WalInner {
            file,
            position,
            file_size,
            ..
        } = &mut *inner;

        match read_frame(file, *position, *file_size)? {
            Some(mut frame) => {
                *position += frame.len() as u64;
                Ok(Some(frame.split_off(FRAME_HEADER)))
            }
            None => Ok(None),
        }
    }

    /// Length of the valid part of the log in bytes.
    pub fn len(&self) -> u64 {
        self.inner.lock().file_size
    }

    /// `true` if the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == HEADER_SIZE
    }

    /// Flush the log to disk.
    pub fn close(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

fn cut(file: &File, len: u64) -> Result<()> {
    file.set_len(len)?;
    file.sync_all()?;
    Ok(())
}

/// Read the framed record at `position`, or `None` if it is cut short by
/// `file_size` or fails its checksum.
fn read_frame(file: &mut File, position: u64, file_size: u64) -> Result<Option<Vec<u8>>> {
    if position + FRAME_HEADER as u64 > file_size {
        return Ok(None);
    }

    let mut header = [0u8; FRAME_HEADER];
    file.seek(SeekFrom::Start(position))?;
    file.read_exact(&mut header)?;

    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
    if position + FRAME_HEADER as u64 + size > file_size {
        return Ok(None);
    }

    let mut frame = vec![0u8; FRAME_HEADER + size as usize];
    frame[..FRAME_HEADER].copy_from_slice(&header);
    file.read_exact(&mut frame[FRAME_HEADER..])?;

    let expected = i32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if checksum(0, &frame[FRAME_HEADER..]) != expected {
        return Ok(None);
    }
    Ok(Some(frame))
}
