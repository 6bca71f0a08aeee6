//! In-memory transaction state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::common::Xid;

/// Isolation level of a transaction.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Sees every committed version.
    #[default]
    ReadCommitted = 0,
    /// Sees the database as of `begin`.
    RepeatableRead = 1,
}

/// Why a transaction was aborted behind its caller's back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCause {
    /// A delete would have skipped over a version it cannot see.
    VersionSkip,
    /// Waiting for a lock would have closed a cycle, or the wait was
    /// cancelled.
    Deadlock,
}

/// An open transaction.
///
/// Lives from `begin` until `commit`/`abort`. Only repeatable-read
/// transactions carry a snapshot.
#[derive(Debug)]
pub struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    /// Transactions active when this one began.
    snapshot: HashSet<Xid>,
    last_error: Mutex<Option<AbortCause>>,
    auto_aborted: AtomicBool,
}

impl Transaction {
    /// Build a transaction. `active` is consulted only for repeatable read.
    pub fn new<'a>(xid: Xid, level: IsolationLevel, active: impl IntoIterator<Item = &'a Xid>) -> Self {
        let snapshot = match level {
            IsolationLevel::RepeatableRead => active.into_iter().copied().collect(),
            IsolationLevel::ReadCommitted => HashSet::new(),
        };
        Self {
            xid,
            level,
            snapshot,
            last_error: Mutex::new(None),
            auto_aborted: AtomicBool::new(false),
        }
    }

    /// `true` if `xid` was active when this transaction began.
    ///
    /// The super transaction is never in a snapshot.
    pub fn in_snapshot(&self, xid: Xid) -> bool {
        !xid.is_super() && self.snapshot.contains(&xid)
    }

    /// The failure that poisoned this transaction, if any.
    pub fn last_error(&self) -> Option<AbortCause> {
        *self.last_error.lock()
    }

    pub(crate) fn set_error(&self, cause: AbortCause) {
        self.last_error.lock().get_or_insert(cause);
    }

    /// `true` once the transaction was aborted internally.
    pub fn is_auto_aborted(&self) -> bool {
        self.auto_aborted.load(Ordering::Acquire)
    }

    /// Flag the internal abort. Returns `true` if it was already flagged.
    pub(crate) fn mark_auto_aborted(&self) -> bool {
        self.auto_aborted.swap(true, Ordering::AcqRel)
    }
}
