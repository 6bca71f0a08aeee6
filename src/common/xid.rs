//! Transaction identifier type.

use std::fmt;

/// Transaction id handed out by the status ledger.
///
/// Ids grow monotonically, so numeric order is begin order. Id 0 is the
/// super transaction: permanently committed and never active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Xid(pub u64);

impl Xid {
    /// The always-committed super transaction.
    pub const SUPER: Xid = Xid(0);

    /// Unset `xmax` stamp. Shares its bits with [`Xid::SUPER`].
    pub const NONE: Xid = Xid(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        Xid(id)
    }

    #[inline]
    pub fn is_super(&self) -> bool {
        *self == Self::SUPER
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xid({})", self.0)
    }
}
