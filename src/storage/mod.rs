//! Storage layer - disk I/O and page formats.
//!
//! This module handles persistent storage:
//! - [`DiskManager`] - Low-level file I/O
//! - [`PageStore`] - Cached, pinned page access
//! - [`page`] - Page types and layouts

mod disk_manager;
pub mod page;
mod page_store;

pub use disk_manager::DiskManager;
pub use page_store::PageStore;
