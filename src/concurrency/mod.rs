//! Multi-version concurrency control.
//!
//! # Components
//! - [`VersionManager`] - Transactional read/insert/delete
//! - [`Transaction`] - Per-transaction isolation level and snapshot
//! - [`Entry`] - A record stamped with creating/deleting transactions
//! - [`visibility`] - Which versions a transaction can see
//! - [`LockTable`] - Record locks with deadlock detection
//! - [`TransactionLedger`] - Durable transaction status

mod entry;
mod ledger;
mod lock_table;
mod transaction;
mod version_manager;
pub mod visibility;

pub use entry::Entry;
pub use ledger::{MemoryLedger, TransactionLedger, TxnStatus, XidFile};
pub use lock_table::{LockTable, WaitToken};
pub use transaction::{AbortCause, IsolationLevel, Transaction};
pub use version_manager::VersionManager;
