//! Debug assertion macros for pool index invariants.
//!
//! Only active in debug builds (`debug_assert!`), so the wait-free paths
//! pay nothing for them in release builds.

/// Assert the producer never runs more than the pool size ahead of the
/// reader.
///
/// Holds after every claim: `W ≤ R + N`, with equality meaning the pool is
/// full. The detached sentinel satisfies it trivially.
macro_rules! debug_assert_bounded_lag {
    ($windex:expr, $rindex:expr, $pool_size:expr) => {
        debug_assert!(
            $windex <= $rindex + $pool_size,
            "write index {} ran past read index {} by more than {} slots",
            $windex,
            $rindex,
            $pool_size
        )
    };
}

/// Assert the reader never advances past the producer.
///
/// Holds while a reader is attached: `R ≤ W`.
macro_rules! debug_assert_reader_behind {
    ($rindex:expr, $windex:expr) => {
        debug_assert!(
            $rindex <= $windex,
            "read index {} passed write index {}",
            $rindex,
            $windex
        )
    };
}

/// Assert the slot being handed back matches the reader's cursor.
///
/// The slot released through `next_readable_buffer` must be the one backing
/// the advanced read index.
macro_rules! debug_assert_cursor_slot {
    ($prev:expr, $slot:expr) => {
        debug_assert!(
            core::ptr::eq($prev as *const _, $slot as *const _),
            "released slot does not back the advanced read index"
        )
    };
}

pub(crate) use debug_assert_bounded_lag;
pub(crate) use debug_assert_cursor_slot;
pub(crate) use debug_assert_reader_behind;
