//! Message system flag bits.

pub const COMPRESSED_FLAG: i32 = 0x1;
pub const MULTI_TAGS_FLAG: i32 = 0x1 << 1;
pub const TRANSACTION_NOT_TYPE: i32 = 0;
pub const TRANSACTION_PREPARED_TYPE: i32 = 0x1 << 2;
pub const TRANSACTION_COMMIT_TYPE: i32 = 0x2 << 2;
pub const TRANSACTION_ROLLBACK_TYPE: i32 = 0x3 << 2;

/// Extract the transaction phase bits of a system flag.
#[must_use]
pub fn transaction_value(flag: i32) -> i32 {
    flag & TRANSACTION_ROLLBACK_TYPE
}

/// Whether the flag marks the prepare phase of a transactional send.
#[must_use]
pub fn is_prepared(flag: i32) -> bool {
    transaction_value(flag) == TRANSACTION_PREPARED_TYPE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_value_ignores_other_bits() {
        let flag = TRANSACTION_PREPARED_TYPE | COMPRESSED_FLAG | MULTI_TAGS_FLAG;
        assert_eq!(transaction_value(flag), TRANSACTION_PREPARED_TYPE);
        assert!(is_prepared(flag));
    }

    #[test]
    fn test_non_prepared_phases() {
        assert!(!is_prepared(TRANSACTION_NOT_TYPE));
        assert!(!is_prepared(TRANSACTION_COMMIT_TYPE));
        assert!(!is_prepared(TRANSACTION_ROLLBACK_TYPE));
        assert!(!is_prepared(COMPRESSED_FLAG));
    }
}
