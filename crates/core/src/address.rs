//! The managed sender `Address` entity.

use serde::{Deserialize, Serialize};

/// Managed sender identity. `nonce` is the next nonce the selector will
/// assign; it is strictly monotonic and single-writer (only the selector
/// advances it, only one selector invocation runs at a time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub addr: String,
    pub nonce: u64,
    pub weight: i64,
    pub is_deleted: bool,
}

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), nonce: 0, weight: 0, is_deleted: false }
    }
}

/// Soft-delete sentinel used at the repository boundary: `-1` means alive,
/// `1` means deleted. The in-core `Address::is_deleted` is a plain bool;
/// a repository implementation backed by a real relational store is
/// expected to translate to/from this sentinel at its edge, matching the
/// schema convention of the system this design descends from.
pub const IS_DELETED_ALIVE: i32 = -1;
pub const IS_DELETED_DELETED: i32 = 1;

pub fn is_deleted_to_sentinel(is_deleted: bool) -> i32 {
    if is_deleted { IS_DELETED_DELETED } else { IS_DELETED_ALIVE }
}

pub fn sentinel_to_is_deleted(sentinel: i32) -> bool {
    sentinel == IS_DELETED_DELETED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_round_trips() {
        assert!(!sentinel_to_is_deleted(is_deleted_to_sentinel(false)));
        assert!(sentinel_to_is_deleted(is_deleted_to_sentinel(true)));
        assert_eq!(is_deleted_to_sentinel(false), IS_DELETED_ALIVE);
        assert_eq!(is_deleted_to_sentinel(true), IS_DELETED_DELETED);
    }
}
