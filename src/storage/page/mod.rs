//! Page types and layout.
//!
//! This module contains:
//! - [`Page`] - A cached 8KB page with its dirty flag
//! - [`data_page`] - Layout of ordinary record pages
//! - [`meta_page`] - Layout of the validity page (page 1)

#[allow(clippy::module_inception)]
mod page;
pub mod data_page;
pub mod meta_page;

pub use page::Page;
