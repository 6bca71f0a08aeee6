//! Common types and utilities shared across KestrelDB.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants
//! - Error types
//! - Identifiers (PageId, Uid, Xid)

pub mod config;
pub mod error;
mod page_id;
mod uid;
mod xid;

pub use error::{Error, Result};
pub use page_id::PageId;
pub use uid::Uid;
pub use xid::Xid;
