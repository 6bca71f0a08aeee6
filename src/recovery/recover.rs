//! Crash recovery.
//!
//! Runs once at open, before any transaction starts, when the validity
//! page shows the previous process did not shut down cleanly:
//!
//! 1. **Truncate**: cut the page file after the highest page the log
//!    mentions. Anything beyond was allocated but never journaled.
//! 2. **Redo**: replay, oldest first, every record of a transaction that
//!    is no longer active.
//! 3. **Undo**: for each transaction still active at the crash, walk its
//!    records newest first, putting old images back and marking inserted
//!    records deleted, then record it as aborted.
//!
//! Both replays are idempotent, so a crash during recovery is recovered by
//! simply running it again.

use std::collections::BTreeMap;

use tracing::info;

use crate::common::{PageId, Result, Xid};
use crate::concurrency::TransactionLedger;
use crate::data::data_item;
use crate::recovery::{LogRecord, Wal};
use crate::storage::page::data_page;
use crate::storage::PageStore;

/// What a recovery run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Highest page kept after truncation.
    pub max_page: u32,
    /// Records reapplied by the redo pass.
    pub redone: usize,
    /// Records rolled back by the undo pass.
    pub undone: usize,
    /// Transactions marked aborted by the undo pass.
    pub aborted: usize,
}

#[derive(Clone, Copy)]
enum Direction {
    Redo,
    Undo,
}

/// Bring the page file back in line with the log.
pub fn recover(ledger: &dyn TransactionLedger, wal: &Wal, pages: &PageStore) -> Result<RecoveryStats> {
    info!("recovery.start");
    let mut stats = RecoveryStats::default();

    stats.max_page = max_logged_page(wal)?;
    pages.truncate(stats.max_page)?;
    info!(max_page = stats.max_page, "recovery.truncate");

    stats.redone = redo(ledger, wal, pages)?;
    info!(redone = stats.redone, "recovery.redo");

    let (undone, aborted) = undo(ledger, wal, pages)?;
    stats.undone = undone;
    stats.aborted = aborted;
    info!(undone, aborted, "recovery.undo");

    info!("recovery.finish");
    Ok(stats)
}

/// Highest page number referenced by the log, at least page 1.
fn max_logged_page(wal: &Wal) -> Result<u32> {
    let mut max_page = PageId::META.0;
    wal.rewind();
    while let Some(data) = wal.next()? {
        let record = LogRecord::decode(&data)?;
        max_page = max_page.max(record.page_id().0);
    }
    Ok(max_page)
}

fn redo(ledger: &dyn TransactionLedger, wal: &Wal, pages: &PageStore) -> Result<usize> {
    let mut redone = 0;
    wal.rewind();
    while let Some(data) = wal.next()? {
        let record = LogRecord::decode(&data)?;
        if !ledger.is_active(record.xid())? {
            apply(pages, &record, Direction::Redo)?;
            redone += 1;
        }
    }
    Ok(redone)
}

fn undo(ledger: &dyn TransactionLedger, wal: &Wal, pages: &PageStore) -> Result<(usize, usize)> {
    let mut pending: BTreeMap<Xid, Vec<LogRecord>> = BTreeMap::new();
    wal.rewind();
    while let Some(data) = wal.next()? {
        let record = LogRecord::decode(&data)?;
        if ledger.is_active(record.xid())? {
            pending.entry(record.xid()).or_default().push(record);
        }
    }

    let mut undone = 0;
    let aborted = pending.len();
    for (xid, records) in pending {
        for record in records.iter().rev() {
            apply(pages, record, Direction::Undo)?;
            undone += 1;
        }
        ledger.abort(xid)?;
    }
    Ok((undone, aborted))
}

fn apply(pages: &PageStore, record: &LogRecord, direction: Direction) -> Result<()> {
    let page = pages.fetch(record.page_id())?;
    match (record, direction) {
        (LogRecord::Insert { offset, raw, .. }, Direction::Redo) => {
            data_page::recover_insert(&page, raw, *offset);
        }
        (LogRecord::Insert { offset, raw, .. }, Direction::Undo) => {
            let mut raw = raw.clone();
            data_item::mark_invalid(&mut raw);
            data_page::recover_insert(&page, &raw, *offset);
        }
        (LogRecord::Update { uid, new_raw, .. }, Direction::Redo) => {
            data_page::recover_update(&page, new_raw, uid.offset());
        }
        (LogRecord::Update { uid, old_raw, .. }, Direction::Undo) => {
            data_page::recover_update(&page, old_raw, uid.offset());
        }
    }
    pages.release(&page)
}
