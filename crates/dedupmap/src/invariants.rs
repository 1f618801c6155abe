//! Debug assertion macros for index invariants.
//!
//! Active only in debug builds (`debug_assert!`), so release builds pay
//! nothing. Used by both index variants.

/// Assert that an entry landed in the bucket its hash selects.
///
/// Checked while a fresh table is still private to the resizing thread, so
/// the walk needs no synchronization.
macro_rules! debug_assert_bucket_placement {
    ($expected:expr, $actual:expr, $id:expr) => {
        debug_assert!(
            $expected == $actual,
            "entry {} rehashed into bucket {} but hashes to {}",
            $id,
            $actual,
            $expected
        )
    };
}

/// Assert the advisory size counter cannot underflow on a successful remove.
macro_rules! debug_assert_size_underflow {
    ($old:expr) => {
        debug_assert!(
            $old > 0,
            "size counter underflow: remove succeeded at size 0"
        )
    };
}

pub(crate) use debug_assert_bucket_placement;
pub(crate) use debug_assert_size_underflow;
