//! Data page layout.
//!
//! Every page after the validity page stores records packed from the front:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       2     free space offset (FSO, big-endian)
//! 2       ...   records, appended at FSO
//! ```
//!
//! Records are never moved or compacted. FSO only grows, and the bytes
//! from FSO to the end of the page are free.

use crate::common::config::PAGE_SIZE;
use crate::storage::page::Page;

/// Size of the free space offset header.
pub const FSO_SIZE: usize = 2;

/// Free bytes on an empty data page: the largest record a page can hold.
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - FSO_SIZE;

/// Bytes for a fresh, empty data page.
pub fn init_raw() -> Box<[u8]> {
    let mut raw = vec![0u8; PAGE_SIZE].into_boxed_slice();
    set_free_space_offset(&mut raw, FSO_SIZE as u16);
    raw
}

/// Read the free space offset from page bytes.
#[inline]
pub fn free_space_offset(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

#[inline]
pub fn set_free_space_offset(data: &mut [u8], offset: u16) {
    data[..FSO_SIZE].copy_from_slice(&offset.to_be_bytes());
}

/// Free bytes left on `page`.
pub fn free_space(page: &Page) -> usize {
    PAGE_SIZE - free_space_offset(&page.read()) as usize
}

/// Append `raw` at the free space offset and return the offset it landed at.
///
/// The caller has already checked that `raw` fits.
pub fn insert(page: &Page, raw: &[u8]) -> u16 {
    let mut data = page.write();
    page.mark_dirty();

    let offset = free_space_offset(&data);
    let start = offset as usize;
    data[start..start + raw.len()].copy_from_slice(raw);
    set_free_space_offset(&mut data, offset + raw.len() as u16);
    offset
}

/// Redo an insert: put `raw` back at `offset`, advancing the free space
/// offset past it if the page does not yet account for those bytes.
pub fn recover_insert(page: &Page, raw: &[u8], offset: u16) {
    let mut data = page.write();
    page.mark_dirty();

    let start = offset as usize;
    data[start..start + raw.len()].copy_from_slice(raw);

    let end = offset + raw.len() as u16;
    if free_space_offset(&data) < end {
        set_free_space_offset(&mut data, end);
    }
}

/// Redo or undo an update: overwrite `raw.len()` bytes at `offset`.
pub fn recover_update(page: &Page, raw: &[u8], offset: u16) {
    let mut data = page.write();
    page.mark_dirty();

    let start = offset as usize;
    data[start..start + raw.len()].copy_from_slice(raw);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageId;

    fn empty_page() -> Page {
        Page::from_bytes(PageId::new(2), init_raw())
    }

    #[test]
    fn test_init_raw() {
        let raw = init_raw();
        assert_eq!(free_space_offset(&raw), 2);
        assert_eq!(raw.len(), PAGE_SIZE);
    }

    #[test]
    fn test_insert_appends() {
        let page = empty_page();
        assert_eq!(free_space(&page), MAX_FREE_SPACE);

        let first = insert(&page, b"hello");
        let second = insert(&page, b"world!");

        assert_eq!(first, 2);
        assert_eq!(second, 7);
        assert_eq!(free_space(&page), MAX_FREE_SPACE - 11);
        assert!(page.is_dirty());
        assert_eq!(&page.read()[7..13], b"world!");
    }

    #[test]
    fn test_recover_insert_advances_fso() {
        let page = empty_page();

        recover_insert(&page, b"abc", 2);
        assert_eq!(free_space_offset(&page.read()), 5);

        // Replaying an older insert must not move FSO backwards.
        recover_insert(&page, b"xy", 2);
        assert_eq!(free_space_offset(&page.read()), 5);
        assert_eq!(&page.read()[2..5], b"xyc");
    }

    #[test]
    fn test_recover_update_keeps_fso() {
        let page = empty_page();
        insert(&page, b"aaaa");

        recover_update(&page, b"bb", 3);
        assert_eq!(&page.read()[2..6], b"abba");
        assert_eq!(free_space_offset(&page.read()), 6);
    }
}
