//! Visibility rules.
//!
//! Decide whether a version stamped `(xmin, xmax)` exists for a reader.
//! Everything is derived from committed status and numeric xid order.

use crate::common::{Result, Xid};
use crate::concurrency::{IsolationLevel, TransactionLedger, Transaction};

/// `true` if `t` can see the version created by `xmin` and deleted by
/// `xmax` (`Xid::NONE` if never deleted).
pub fn is_visible(ledger: &dyn TransactionLedger, t: &Transaction, xmin: Xid, xmax: Xid) -> Result<bool> {
    match t.level {
        IsolationLevel::ReadCommitted => read_committed(ledger, t, xmin, xmax),
        IsolationLevel::RepeatableRead => repeatable_read(ledger, t, xmin, xmax),
    }
}

/// `true` if deleting this version would skip over a change `t` cannot
/// see. Only repeatable-read transactions can skip versions.
pub fn is_version_skip(ledger: &dyn TransactionLedger, t: &Transaction, xmax: Xid) -> Result<bool> {
    if t.level == IsolationLevel::ReadCommitted {
        return Ok(false);
    }
    Ok(ledger.is_committed(xmax)? && (xmax > t.xid || t.in_snapshot(xmax)))
}

fn read_committed(ledger: &dyn TransactionLedger, t: &Transaction, xmin: Xid, xmax: Xid) -> Result<bool> {
    let xid = t.xid;
    if xmin == xid && xmax == Xid::NONE {
        return Ok(true);
    }

    if ledger.is_committed(xmin)? {
        if xmax == Xid::NONE {
            return Ok(true);
        }
        if xmax != xid && !ledger.is_committed(xmax)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn repeatable_read(ledger: &dyn TransactionLedger, t: &Transaction, xmin: Xid, xmax: Xid) -> Result<bool> {
    let xid = t.xid;
    if xmin == xid && xmax == Xid::NONE {
        return Ok(true);
    }

    if ledger.is_committed(xmin)? && xmin < xid && !t.in_snapshot(xmin) {
        if xmax == Xid::NONE {
            return Ok(true);
        }
        if xmax != xid
            && (!ledger.is_committed(xmax)? || xmax > xid || t.in_snapshot(xmax))
        {
            return Ok(true);
        }
    }
    Ok(false)
}
