//! One-shot and level-triggered atomic flags for "run this exactly once"
//! and "has this been set yet" checks, without pulling in a full mutex.

use core::sync::atomic::{AtomicBool, Ordering};

/// CAS-guarded one-shot latch. [`InitFlag::init_once`] returns `true` for
/// exactly one caller — the one that performs the false-to-true transition —
/// and `false` for every other caller, including ones that race it.
pub struct InitFlag {
    done: AtomicBool,
}

impl InitFlag {
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    /// Attempt the one-time transition. Returns `true` only for the caller
    /// that wins the race; safe to call repeatedly or concurrently.
    #[inline]
    pub fn init_once(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the flag has been set, by this caller or another.
    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Default for InitFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// A simple level-triggered flag: unlike [`InitFlag`] it can be cleared and
/// re-set, with no "only one winner" semantics.
pub struct StateFlag {
    set: AtomicBool,
}

impl StateFlag {
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    pub fn set(&self) {
        self.set.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub fn clear(&self) {
        self.set.store(false, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }
}

impl Default for StateFlag {
    fn default() -> Self {
        Self::new()
    }
}
