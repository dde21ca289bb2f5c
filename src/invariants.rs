//! Debug assertion helpers for this crate's data-model invariants.
//!
//! These are only active in debug builds (`debug_assert!` no-ops in release),
//! so there is zero overhead in release builds.

use std::cell::Cell;

// =============================================================================
// INV-FREE-01: Free-space identity
// =============================================================================

/// `free_bytes == ring_length` when `ntuples == 0`, otherwise
/// `(read_pos - write_pos) mod ring_length`. Checked at the call site since
/// the formula itself lives in `ring::free_bytes`; this macro only bounds
/// the result.
macro_rules! debug_assert_free_bytes_bounded {
    ($free:expr, $ring_len:expr) => {
        debug_assert!(
            $free <= $ring_len,
            "INV-FREE-01 violated: free bytes {} exceeds ring length {}",
            $free,
            $ring_len
        )
    };
}

// =============================================================================
// INV-NT-01: ntuples / position aliasing
// =============================================================================

/// `ntuples == 0 <=> read_pos == write_pos`, except in `LONG_TUPLE` mode.
macro_rules! debug_assert_ntuples_position_consistent {
    ($ntuples:expr, $read_pos:expr, $write_pos:expr) => {
        debug_assert!(
            $ntuples == crate::entry::LONG_TUPLE
                || ($ntuples == 0) == ($read_pos == $write_pos),
            "INV-NT-01 violated: ntuples={} read_pos={} write_pos={}",
            $ntuples,
            $read_pos,
            $write_pos
        )
    };
}

pub(crate) use debug_assert_free_bytes_bounded;
pub(crate) use debug_assert_ntuples_position_consistent;

// =============================================================================
// INV-LOCK-01: Global lock order (Registry -> producer -> consumer)
// =============================================================================

/// Registry lock: the outermost lock.
pub(crate) const LEVEL_REGISTRY: u8 = 1;
/// `producer_lock` for one queue.
pub(crate) const LEVEL_PRODUCER: u8 = 2;
/// `consumer_lock[i]` for one queue's slot.
pub(crate) const LEVEL_CONSUMER: u8 = 3;

thread_local! {
    static LOCK_LEVEL: Cell<u8> = const { Cell::new(0) };
}

/// RAII marker proving (in debug builds) that locks were taken in the order
/// Registry -> producer -> consumer on this thread, and never re-entered out
/// of order. Acquire this alongside the real lock at every lock site; it
/// restores the previous level on drop so nested acquisitions compose.
pub(crate) struct LockLevelGuard {
    previous: u8,
}

impl LockLevelGuard {
    pub(crate) fn enter(level: u8) -> Self {
        let previous = LOCK_LEVEL.with(Cell::get);
        debug_assert!(
            level > previous,
            "INV-LOCK-01 violated: acquired lock level {level} while holding level {previous}"
        );
        LOCK_LEVEL.with(|c| c.set(level));
        Self { previous }
    }
}

impl Drop for LockLevelGuard {
    fn drop(&mut self) {
        LOCK_LEVEL.with(|c| c.set(self.previous));
    }
}
