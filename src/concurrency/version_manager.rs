//! Version Manager - MVCC over the record store.
//!
//! The entry point for transactional access:
//!
//! ```text
//! begin ──► read / insert / delete ──► commit | abort
//! ```
//!
//! Reads never block. Deletes lock the record in the [`LockTable`] and may
//! wait for its holder to finish. A delete that would deadlock, or that
//! would overwrite a version the transaction cannot see, aborts the
//! transaction and reports `Error::ConcurrentUpdate`; every later
//! operation on it reports the same until the caller aborts it.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use kestreldb::common::config::DEFAULT_MEMORY;
//! use kestreldb::concurrency::{IsolationLevel, MemoryLedger, VersionManager};
//! use kestreldb::data::DataManager;
//!
//! let dm = Arc::new(DataManager::create("/tmp/bank", DEFAULT_MEMORY)?);
//! let vm = VersionManager::new(Arc::new(MemoryLedger::new()), Arc::clone(&dm));
//!
//! let xid = vm.begin(IsolationLevel::ReadCommitted)?;
//! let uid = vm.insert(xid, b"alice:100")?;
//! assert_eq!(vm.read(xid, uid)?, Some(b"alice:100".to_vec()));
//! vm.commit(xid)?;
//! # Ok::<(), kestreldb::Error>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{Cache, CacheSource, CacheStats};
use crate::common::{Error, Result, Uid, Xid};
use crate::concurrency::entry::{self, Entry};
use crate::concurrency::visibility::{is_version_skip, is_visible};
use crate::concurrency::{AbortCause, IsolationLevel, LockTable, Transaction, TransactionLedger};
use crate::data::DataManager;

/// Loads entries for the entry cache. Each cached entry pins its data item.
struct EntrySource {
    dm: Arc<DataManager>,
}

impl CacheSource for EntrySource {
    type Item = Entry;

    fn load(&self, key: u64) -> Result<Entry> {
        let uid = Uid(key);
        let item = match self.dm.read(uid) {
            Ok(Some(item)) => item,
            Ok(None) | Err(Error::PageNotFound(_)) => return Err(Error::NullEntry),
            Err(err) => return Err(err),
        };
        if item.with_payload(<[u8]>::len) < entry::HEADER_SIZE {
            self.dm.release(&item)?;
            return Err(Error::NullEntry);
        }
        Ok(Entry::new(uid, item))
    }

    fn evict(&self, _key: u64, entry: &Entry) -> Result<()> {
        self.dm.release(entry.item())
    }
}

/// Transactional, multi-version record access.
///
/// # Thread Safety
/// - `active`: `Mutex` over the open transactions; `begin` holds it while
///   taking a snapshot so the snapshot and the new id agree
/// - `locks`: the lock-wait graph has its own mutex
/// - `entries`: the cache synchronizes itself
pub struct VersionManager {
    ledger: Arc<dyn TransactionLedger>,
    entries: Cache<EntrySource>,
    active: Mutex<HashMap<Xid, Arc<Transaction>>>,
    /// Read-only context for `Xid::SUPER`.
    super_txn: Arc<Transaction>,
    locks: LockTable,
}

impl VersionManager {
    pub fn new(ledger: Arc<dyn TransactionLedger>, dm: Arc<DataManager>) -> Self {
        Self {
            ledger,
            entries: Cache::new(EntrySource { dm }, 0),
            active: Mutex::new(HashMap::new()),
            super_txn: Arc::new(Transaction::new(
                Xid::SUPER,
                IsolationLevel::ReadCommitted,
                &[],
            )),
            locks: LockTable::new(),
        }
    }

    // ========================================================================
    // Public API: Transactions
    // ========================================================================

    /// Start a transaction.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let mut active = self.active.lock();
        let xid = self.ledger.begin()?;
        let txn = Transaction::new(xid, level, active.keys());
        active.insert(xid, Arc::new(txn));
        debug!(xid = xid.0, ?level, "vm.begin");
        Ok(xid)
    }

    /// Commit `xid`, handing its locks to waiting transactions.
    ///
    /// # Errors
    /// Returns `Error::ConcurrentUpdate` if the transaction was aborted
    /// internally; the caller must `abort` it instead.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        let txn = self.open_transaction(xid)?;
        if txn.last_error().is_some() {
            return Err(Error::ConcurrentUpdate);
        }

        {
            // Held across the ledger write so a concurrent `begin` either
            // snapshots `xid` as active or sees it committed.
            let mut active = self.active.lock();
            self.ledger.commit(xid)?;
            active.remove(&xid);
        }
        self.locks.remove(xid);
        debug!(xid = xid.0, "vm.commit");
        Ok(())
    }

    /// Abort `xid`. A transaction already aborted internally is only
    /// deregistered.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.internal_abort(xid, false)
    }

    /// Context of a registered transaction. `Xid::SUPER` is always known.
    pub fn transaction(&self, xid: Xid) -> Result<Arc<Transaction>> {
        if xid.is_super() {
            return Ok(Arc::clone(&self.super_txn));
        }
        self.active
            .lock()
            .get(&xid)
            .cloned()
            .ok_or(Error::TransactionNotActive(xid.0))
    }

    // ========================================================================
    // Public API: Records
    // ========================================================================

    /// Read the version of `uid` visible to `xid`.
    ///
    /// Returns `None` if the record does not exist or is not visible.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let txn = self.usable_transaction(xid)?;
        let Some(entry) = self.fetch(uid)? else {
            return Ok(None);
        };

        let result = is_visible(&*self.ledger, &txn, entry.xmin(), entry.xmax())
            .map(|visible| visible.then(|| entry.data()));
        self.entries.release(uid.0)?;
        result
    }

    /// Insert `data` as a new version created by `xid`.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.usable_transaction(xid)?;
        self.dm().insert(xid, &Entry::wrap(xid, data))
    }

    /// Delete the version of `uid` visible to `xid`.
    ///
    /// Returns `false` if there was nothing visible to delete or `xid`
    /// already deleted it. May block while another transaction holds the
    /// record.
    ///
    /// # Errors
    /// Returns `Error::ConcurrentUpdate` if the transaction had to abort
    /// because of a deadlock or a version skip.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        if xid.is_super() {
            return Err(Error::TransactionNotActive(xid.0));
        }
        let txn = self.usable_transaction(xid)?;
        let Some(entry) = self.fetch(uid)? else {
            return Ok(false);
        };

        let result = self.delete_entry(&txn, &entry);
        self.entries.release(uid.0)?;
        result
    }

    fn delete_entry(&self, txn: &Transaction, entry: &Entry) -> Result<bool> {
        let xid = txn.xid;
        if !is_visible(&*self.ledger, txn, entry.xmin(), entry.xmax())? {
            return Ok(false);
        }

        match self.locks.acquire(xid, entry.uid()) {
            Ok(None) => {}
            Ok(Some(token)) => {
                if !token.wait() {
                    // Cancelled: the transaction was aborted while blocked.
                    txn.set_error(AbortCause::Deadlock);
                    return Err(Error::ConcurrentUpdate);
                }
            }
            Err(Error::Deadlock) => {
                txn.set_error(AbortCause::Deadlock);
                self.internal_abort(xid, true)?;
                return Err(Error::ConcurrentUpdate);
            }
            Err(err) => return Err(err),
        }

        let xmax = entry.xmax();
        if xmax == xid {
            return Ok(false);
        }

        if is_version_skip(&*self.ledger, txn, xmax)? {
            txn.set_error(AbortCause::VersionSkip);
            self.internal_abort(xid, true)?;
            return Err(Error::ConcurrentUpdate);
        }

        entry.set_xmax(xid, self.dm().wal())?;
        Ok(true)
    }

    // ========================================================================
    // Public API: Lifecycle
    // ========================================================================

    /// Release every cached entry. The data manager is closed separately.
    pub fn close(&self) -> Result<()> {
        self.entries.close_all()
    }

    pub fn ledger(&self) -> &Arc<dyn TransactionLedger> {
        &self.ledger
    }

    pub fn data_manager(&self) -> &Arc<DataManager> {
        &self.entries.source().dm
    }

    /// Statistics of the entry cache.
    pub fn entry_stats(&self) -> &CacheStats {
        self.entries.stats()
    }

    /// `true` if `xid` is blocked waiting for a record lock.
    pub fn is_waiting(&self, xid: Xid) -> bool {
        self.locks.is_waiting(xid)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn dm(&self) -> &DataManager {
        &self.entries.source().dm
    }

    /// Pin the entry at `uid`, mapping a missing record to `None`.
    fn fetch(&self, uid: Uid) -> Result<Option<Arc<Entry>>> {
        match self.entries.acquire(uid.0) {
            Ok(entry) => Ok(Some(entry)),
            Err(Error::NullEntry) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// A registered, non-super transaction.
    fn open_transaction(&self, xid: Xid) -> Result<Arc<Transaction>> {
        if xid.is_super() {
            return Err(Error::TransactionNotActive(xid.0));
        }
        self.transaction(xid)
    }

    /// A transaction that has not been poisoned by a forced abort.
    fn usable_transaction(&self, xid: Xid) -> Result<Arc<Transaction>> {
        let txn = self.transaction(xid)?;
        if txn.last_error().is_some() {
            return Err(Error::ConcurrentUpdate);
        }
        Ok(txn)
    }

    /// Abort `xid`. An automatic abort keeps the transaction registered so
    /// later calls see its error; the caller's own `abort` then only
    /// deregisters it.
    fn internal_abort(&self, xid: Xid, auto: bool) -> Result<()> {
        if xid.is_super() {
            return Err(Error::TransactionNotActive(xid.0));
        }

        let txn = {
            let mut active = self.active.lock();
            let txn = if auto {
                active.get(&xid).cloned()
            } else {
                active.remove(&xid)
            };
            let txn = txn.ok_or(Error::TransactionNotActive(xid.0))?;

            let already = if auto {
                txn.mark_auto_aborted()
            } else {
                txn.is_auto_aborted()
            };
            if already {
                return Ok(());
            }
            self.ledger.abort(xid)?;
            txn
        };

        self.locks.remove(xid);
        debug!(xid = xid.0, auto, cause = ?txn.last_error(), "vm.abort");
        Ok(())
    }
}
