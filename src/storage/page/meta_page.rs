//! Validity page (page 1).
//!
//! Detects whether the previous process shut down cleanly:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 100     8     token stamped at open
//! 108     8     copy of the token, written at clean close
//! ```
//!
//! If the two slots differ on open, the process crashed and the log must
//! be replayed.

use rand::RngCore;

use crate::common::config::PAGE_SIZE;
use crate::storage::page::Page;

/// Offset of the open token.
pub const TOKEN_OFFSET: usize = 100;

/// Length of the token.
pub const TOKEN_LEN: usize = 8;

const CLOSE_OFFSET: usize = TOKEN_OFFSET + TOKEN_LEN;

/// Bytes for a brand-new validity page, already stamped as open.
pub fn init_raw() -> Box<[u8]> {
    let mut raw = vec![0u8; PAGE_SIZE].into_boxed_slice();
    stamp_token(&mut raw);
    raw
}

/// Stamp a fresh random token into the open slot.
pub fn set_open(page: &Page) {
    let mut data = page.write();
    page.mark_dirty();
    stamp_token(&mut data);
}

/// Copy the open token into the close slot.
pub fn set_close(page: &Page) {
    let mut data = page.write();
    page.mark_dirty();
    data.copy_within(TOKEN_OFFSET..CLOSE_OFFSET, CLOSE_OFFSET);
}

/// `true` if the last shutdown was clean.
pub fn check(page: &Page) -> bool {
    let data = page.read();
    data[TOKEN_OFFSET..CLOSE_OFFSET] == data[CLOSE_OFFSET..CLOSE_OFFSET + TOKEN_LEN]
}

fn stamp_token(data: &mut [u8]) {
    rand::thread_rng().fill_bytes(&mut data[TOKEN_OFFSET..CLOSE_OFFSET]);
}
