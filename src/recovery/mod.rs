//! Write-ahead logging and crash recovery.
//!
//! - [`Wal`] - Checksummed append-only log
//! - [`LogRecord`] - Insert and update records stored in the log
//! - [`recover`] - Redo/undo replay run at open after a crash

mod log_record;
mod recover;
mod wal;

pub use log_record::LogRecord;
pub use recover::{recover, RecoveryStats};
pub use wal::Wal;
