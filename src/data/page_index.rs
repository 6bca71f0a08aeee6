//! Free-space index.
//!
//! Pages are filed into buckets by how many free bytes they have. Bucket
//! `k` holds pages with `k * THRESHOLD <= free < (k + 1) * THRESHOLD`.
//! A page is in at most one bucket, and a page handed out by `select` is
//! out of the index until the caller files it back with `add`. That
//! checkout is what keeps two inserts from filling the same page at once.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::common::config::{PAGE_INDEX_INTERVALS, PAGE_SIZE};
use crate::common::PageId;

/// Width of one bucket in bytes.
const THRESHOLD: usize = PAGE_SIZE / PAGE_INDEX_INTERVALS;

/// A page and how many free bytes it had when filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_id: PageId,
    pub free_space: usize,
}

/// Bucketed directory of pages with free space.
pub struct PageIndex {
    buckets: Mutex<Vec<VecDeque<PageInfo>>>,
}

impl PageIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![VecDeque::new(); PAGE_INDEX_INTERVALS + 1]),
        }
    }

    /// File `page_id` under its free-space bucket.
    pub fn add(&self, page_id: PageId, free_space: usize) {
        let bucket = (free_space / THRESHOLD).min(PAGE_INDEX_INTERVALS);
        self.buckets.lock()[bucket].push_back(PageInfo {
            page_id,
            free_space,
        });
    }

    /// Check out a page with at least `space` free bytes.
    ///
    /// The search starts one bucket above the one `space` falls in, so any
    /// page found below the top bucket is guaranteed to have room. The top
    /// bucket is open-ended and is checked page by page. Returns `None` if
    /// no bucket qualifies.
    pub fn select(&self, space: usize) -> Option<PageInfo> {
        let start = (space / THRESHOLD + 1).min(PAGE_INDEX_INTERVALS);
        let mut buckets = self.buckets.lock();
        buckets[start..].iter_mut().find_map(|bucket| {
            let pos = bucket.iter().position(|info| info.free_space >= space)?;
            bucket.remove(pos)
        })
    }

    /// Number of filed pages.
    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PageIndex {
    fn default() -> Self {
        Self::new()
    }
}
