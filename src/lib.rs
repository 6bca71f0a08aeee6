//! KestrelDB - A page-oriented storage engine with write-ahead logging,
//! crash recovery and multi-version concurrency control.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           KestrelDB                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Transaction Layer (concurrency/)               │   │
//! │  │   VersionManager + LockTable + visibility + XidFile      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Data Layer (data/)                          │   │
//! │  │        DataManager + DataItem + PageIndex                │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                ↓                              ↓                 │
//! │  ┌───────────────────────────┐  ┌──────────────────────────┐   │
//! │  │   Page Cache (storage/)   │  │  Log (recovery/)          │   │
//! │  │  PageStore + DiskManager  │  │  Wal + LogRecord + redo/  │   │
//! │  │  on top of buffer::Cache  │  │  undo recovery            │   │
//! │  └───────────────────────────┘  └──────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, Uid, Xid, Error, config)
//! - [`buffer`] - Generic reference-counted cache
//! - [`storage`] - Disk I/O and page formats
//! - [`recovery`] - Write-ahead logging and crash recovery
//! - [`data`] - Record storage on top of pages and the log
//! - [`concurrency`] - Transactions, MVCC visibility and locking
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use kestreldb::{DataManager, IsolationLevel, VersionManager, XidFile};
//! use kestreldb::common::config::DEFAULT_MEMORY;
//!
//! let ledger = Arc::new(XidFile::create("my_database").unwrap());
//! let dm = Arc::new(DataManager::create("my_database", DEFAULT_MEMORY).unwrap());
//! let vm = VersionManager::new(ledger, dm);
//!
//! let xid = vm.begin(IsolationLevel::ReadCommitted).unwrap();
//! let uid = vm.insert(xid, b"hello").unwrap();
//! assert_eq!(vm.read(xid, uid).unwrap().as_deref(), Some(&b"hello"[..]));
//! vm.commit(xid).unwrap();
//! ```

// Core modules
pub mod buffer;
pub mod common;
pub mod storage;

// Engine layers
pub mod concurrency;
pub mod data;
pub mod recovery;

// Re-export commonly used items at crate root for convenience
pub use common::config::PAGE_SIZE;
pub use common::{Error, PageId, Result, Uid, Xid};

pub use buffer::{CacheStats, StatsSnapshot};
pub use concurrency::{IsolationLevel, MemoryLedger, TransactionLedger, VersionManager, XidFile};
pub use data::DataManager;
pub use recovery::Wal;
pub use storage::page::Page;
pub use storage::{DiskManager, PageStore};
