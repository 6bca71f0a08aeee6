//! Error types for KestrelDB.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
/// This is a common Rust pattern (see `std::io::Result`).
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in KestrelDB.
///
/// Structural failures (`BadLogFile`, `BadXidFile`, file errors at open)
/// are fatal for the open sequence. `ConcurrentUpdate` and `Deadlock` are
/// ordinary, per-transaction failures.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from disk operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Every cache slot is occupied by a referenced resource.
    #[error("cache is full")]
    CacheFull,

    /// The memory budget cannot hold the minimum number of cached pages.
    #[error("memory budget too small")]
    MemTooSmall,

    /// The record does not fit in an empty page.
    #[error("data too large")]
    DataTooLarge,

    /// No page with enough free space was found after repeated allocation.
    #[error("database busy")]
    DatabaseBusy,

    /// The transaction was forced to abort (version skip or deadlock).
    #[error("concurrent update issue")]
    ConcurrentUpdate,

    /// Granting the lock would close a cycle in the wait graph.
    #[error("deadlock")]
    Deadlock,

    /// The log header checksum disagrees with its records.
    #[error("bad log file")]
    BadLogFile,

    /// The transaction status file has an inconsistent length.
    #[error("bad xid file")]
    BadXidFile,

    /// A uid does not resolve to a live record.
    #[error("null entry")]
    NullEntry,

    #[error("file already exists: {}", .0.display())]
    FileExists(PathBuf),

    #[error("file does not exist: {}", .0.display())]
    FileNotExists(PathBuf),

    #[error("file cannot be read or written: {}", .0.display())]
    FileCannotRW(PathBuf),

    /// Requested page does not exist on disk.
    #[error("page {0} not found")]
    PageNotFound(u32),

    /// The xid is not registered as an active transaction.
    #[error("transaction {0} is not active")]
    TransactionNotActive(u64),
}

impl Error {
    /// Classify an error raised while creating or opening `path`.
    pub(crate) fn from_open(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AlreadyExists => Error::FileExists(path.to_path_buf()),
            io::ErrorKind::NotFound => Error::FileNotExists(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Error::FileCannotRW(path.to_path_buf()),
            _ => Error::Io(err),
        }
    }
}
