//! Record address type.

use std::fmt;

use crate::common::PageId;

/// Addresses one data item: page number in the high 32 bits, in-page
/// byte offset in the low 16 bits.
///
/// # Example
/// ```
/// use kestreldb::{PageId, Uid};
///
/// let uid = Uid::new(PageId::new(3), 130);
/// assert_eq!(uid.page_id(), PageId::new(3));
/// assert_eq!(uid.offset(), 130);
/// assert_eq!(uid.0, (3u64 << 32) | 130);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub u64);

impl Uid {
    /// Build the address of the record at `offset` in page `page_id`.
    #[inline]
    pub fn new(page_id: PageId, offset: u16) -> Self {
        Uid(((page_id.0 as u64) << 32) | offset as u64)
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId((self.0 >> 32) as u32)
    }

    #[inline]
    pub fn offset(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({}:{})", self.page_id().0, self.offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_uid_layout() {
        let uid = Uid::new(PageId::new(1), 0);
        assert_eq!(uid.0, 1 << 32);

        let uid = Uid::new(PageId::new(u32::MAX), u16::MAX);
        assert_eq!(uid.page_id(), PageId::new(u32::MAX));
        assert_eq!(uid.offset(), u16::MAX);
    }

    #[test]
    fn test_uid_display() {
        assert_eq!(format!("{}", Uid::new(PageId::new(7), 2)), "Uid(7:2)");
    }

    proptest! {
        #[test]
        fn prop_uid_preserves_address(page in 1u32.., offset in any::<u16>()) {
            let uid = Uid::new(PageId::new(page), offset);
            prop_assert_eq!(uid.page_id().0, page);
            prop_assert_eq!(uid.offset(), offset);
        }
    }
}
