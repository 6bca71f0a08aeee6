//! Transaction status ledger.
//!
//! The ledger hands out transaction ids and durably records whether each
//! one is active, committed or aborted. Recovery and visibility consult it;
//! nothing else about a transaction survives a restart.
//!
//! Two implementations ship:
//! - [`XidFile`] - the durable `<base>.xid` file
//! - [`MemoryLedger`] - in-process, for embedders that persist status
//!   elsewhere and for tests

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::common::config::{suffixed, XID_SUFFIX};
use crate::common::{Error, Result, Xid};

/// Status of one transaction.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Active = 0,
    Committed = 1,
    Aborted = 2,
}

impl TxnStatus {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TxnStatus::Active),
            1 => Some(TxnStatus::Committed),
            2 => Some(TxnStatus::Aborted),
            _ => None,
        }
    }
}

/// Oracle for transaction status.
///
/// Implementors provide `begin`, the two terminal transitions and a raw
/// `status` lookup. The `is_*` queries are derived and treat
/// [`Xid::SUPER`] as permanently committed.
pub trait TransactionLedger: Send + Sync {
    /// Start a transaction and return its fresh id.
    fn begin(&self) -> Result<Xid>;

    fn commit(&self, xid: Xid) -> Result<()>;

    fn abort(&self, xid: Xid) -> Result<()>;

    /// Recorded status of `xid`, or `None` if it was never handed out.
    fn status(&self, xid: Xid) -> Result<Option<TxnStatus>>;

    fn is_active(&self, xid: Xid) -> Result<bool> {
        self.check(xid, TxnStatus::Active)
    }

    fn is_committed(&self, xid: Xid) -> Result<bool> {
        self.check(xid, TxnStatus::Committed)
    }

    fn is_aborted(&self, xid: Xid) -> Result<bool> {
        self.check(xid, TxnStatus::Aborted)
    }

    #[doc(hidden)]
    fn check(&self, xid: Xid, expected: TxnStatus) -> Result<bool> {
        if xid.is_super() {
            return Ok(expected == TxnStatus::Committed);
        }
        Ok(self.status(xid)? == Some(expected))
    }
}

// ============================================================================
// XidFile
// ============================================================================

/// Bytes before the first status byte: the transaction counter.
const HEADER_LEN: u64 = 8;

struct XidFileInner {
    file: File,
    /// Number of ids handed out so far.
    counter: u64,
}

/// Durable ledger stored as `<base>.xid`.
///
/// # File Layout
/// ```text
/// Offset      Size  Field
/// ------      ----  -----
/// 0           8     counter (big-endian)
/// 8 + (n-1)   1     status of transaction n
/// ```
///
/// The file length is always `8 + counter`. Every write is synced before
/// the call returns.
pub struct XidFile {
    inner: Mutex<XidFileInner>,
}

impl XidFile {
    /// Create `<base>.xid` with a zero counter.
    pub fn create<P: AsRef<Path>>(base: P) -> Result<Self> {
        let path = suffixed(base.as_ref(), XID_SUFFIX);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::from_open(&path, e))?;

        file.write_all(&0u64.to_be_bytes())?;
        file.sync_all()?;

        Ok(Self {
            inner: Mutex::new(XidFileInner { file, counter: 0 }),
        })
    }

    /// Open `<base>.xid`, checking that its length matches the counter.
    ///
    /// # Errors
    /// Returns `Error::BadXidFile` if the header is missing or the file
    /// length disagrees with it.
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        let path = suffixed(base.as_ref(), XID_SUFFIX);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::from_open(&path, e))?;

        let len = file.metadata()?.len();
        if len < HEADER_LEN {
            error!(len, "xid.header_missing");
            return Err(Error::BadXidFile);
        }

        let mut header = [0u8; HEADER_LEN as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let counter = u64::from_be_bytes(header);

        if HEADER_LEN.checked_add(counter) != Some(len) {
            error!(counter, len, "xid.length_mismatch");
            return Err(Error::BadXidFile);
        }

        Ok(Self {
            inner: Mutex::new(XidFileInner { file, counter }),
        })
    }

    /// Sync the file.
    pub fn close(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn position(xid: Xid) -> u64 {
        HEADER_LEN + (xid.0 - 1)
    }

    fn write_status(inner: &mut XidFileInner, xid: Xid, status: TxnStatus) -> Result<()> {
        inner.file.seek(SeekFrom::Start(Self::position(xid)))?;
        inner.file.write_all(&[status as u8])?;
        inner.file.sync_data()?;
        Ok(())
    }

    fn update(&self, xid: Xid, status: TxnStatus) -> Result<()> {
        let mut inner = self.inner.lock();
        if xid.is_super() || xid.0 > inner.counter {
            return Err(Error::TransactionNotActive(xid.0));
        }
        Self::write_status(&mut inner, xid, status)
    }
}

impl TransactionLedger for XidFile {
    fn begin(&self) -> Result<Xid> {
        // The guard drops on every exit path, including `?`.
        let mut inner = self.inner.lock();
        let xid = Xid(inner.counter + 1);

        Self::write_status(&mut inner, xid, TxnStatus::Active)?;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&xid.0.to_be_bytes())?;
        inner.file.sync_all()?;

        inner.counter = xid.0;
        debug!(xid = xid.0, "xid.begin");
        Ok(xid)
    }

    fn commit(&self, xid: Xid) -> Result<()> {
        self.update(xid, TxnStatus::Committed)
    }

    fn abort(&self, xid: Xid) -> Result<()> {
        self.update(xid, TxnStatus::Aborted)
    }

    fn status(&self, xid: Xid) -> Result<Option<TxnStatus>> {
        let mut inner = self.inner.lock();
        if xid.is_super() || xid.0 > inner.counter {
            return Ok(None);
        }

        let mut byte = [0u8; 1];
        inner.file.seek(SeekFrom::Start(Self::position(xid)))?;
        inner.file.read_exact(&mut byte)?;
        Ok(TxnStatus::from_u8(byte[0]))
    }
}

// ============================================================================
// MemoryLedger
// ============================================================================

/// Ledger kept in memory. Status is lost when it is dropped.
#[derive(Default)]
pub struct MemoryLedger {
    /// Status of transaction `n` at index `n - 1`.
    statuses: Mutex<Vec<TxnStatus>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, xid: Xid, status: TxnStatus) -> Result<()> {
        let mut statuses = self.statuses.lock();
        match xid.0.checked_sub(1).and_then(|i| statuses.get_mut(i as usize)) {
            Some(slot) => {
                *slot = status;
                Ok(())
            }
            None => Err(Error::TransactionNotActive(xid.0)),
        }
    }
}

impl TransactionLedger for MemoryLedger {
    fn begin(&self) -> Result<Xid> {
        let mut statuses = self.statuses.lock();
        statuses.push(TxnStatus::Active);
        Ok(Xid(statuses.len() as u64))
    }

    fn commit(&self, xid: Xid) -> Result<()> {
        self.update(xid, TxnStatus::Committed)
    }

    fn abort(&self, xid: Xid) -> Result<()> {
        self.update(xid, TxnStatus::Aborted)
    }

    fn status(&self, xid: Xid) -> Result<Option<TxnStatus>> {
        let statuses = self.statuses.lock();
        Ok(xid
            .0
            .checked_sub(1)
            .and_then(|i| statuses.get(i as usize))
            .copied())
    }
}
