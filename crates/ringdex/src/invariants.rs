//! Debug assertion macros for structural invariants.
//!
//! Each macro states one invariant of the ring buffer, queue, or tree and is
//! only active in debug builds, so there is zero overhead in release builds.

/// Assert that the live population of a ring never exceeds its capacity.
///
/// **Invariant**: `0 ≤ (tail - head) ≤ capacity`
macro_rules! debug_assert_population {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "ring population {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

/// Assert that the emptiness-tracking threshold stays in its legal range.
///
/// **Invariant**: `-1 ≤ threshold ≤ 3 * capacity - 1`
macro_rules! debug_assert_threshold {
    ($threshold:expr, $capacity:expr) => {
        debug_assert!(
            (-1..=(3 * $capacity as i64 - 1)).contains(&$threshold),
            "threshold {} outside [-1, {}]",
            $threshold,
            3 * $capacity as i64 - 1
        )
    };
}

/// Assert that an index handed to `enqueue` fits the usable index range.
///
/// **Invariant**: enqueued indices are in `[0, capacity)`
macro_rules! debug_assert_index_range {
    ($index:expr, $capacity:expr) => {
        debug_assert!(
            ($index as usize) < $capacity,
            "index {} outside the usable range [0, {})",
            $index,
            $capacity
        )
    };
}

/// Assert that a node id returned to an id pool names a real arena slot.
macro_rules! debug_assert_arena_id {
    ($index:expr, $arena_len:expr) => {
        debug_assert!(
            ($index as usize) < $arena_len,
            "node index {} outside arena of {} slots",
            $index,
            $arena_len
        )
    };
}

/// Assert that the release DFS never outgrows its fixed stack.
///
/// **Invariant**: discarded subtrees have depth ≤ 8
macro_rules! debug_assert_release_depth {
    ($depth:expr, $max:expr) => {
        debug_assert!(
            $depth <= $max,
            "release stack depth {} exceeds {}",
            $depth,
            $max
        )
    };
}

pub(crate) use debug_assert_arena_id;
pub(crate) use debug_assert_index_range;
pub(crate) use debug_assert_population;
pub(crate) use debug_assert_release_depth;
pub(crate) use debug_assert_threshold;
