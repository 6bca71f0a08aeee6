//! Record layer.
//!
//! - [`DataItem`] - A variable-length record and its write protocol
//! - [`DataManager`] - Record store over pages and the log
//! - [`PageIndex`] - Free-space index used to place new records

pub mod data_item;
mod data_manager;
mod page_index;

pub use data_item::{DataItem, DataItemWriter};
pub use data_manager::DataManager;
pub use page_index::{PageIndex, PageInfo};
