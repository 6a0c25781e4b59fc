//! Monotonic tick counter.
//!
//! Bumped by the timer interrupt handler (out of scope here); the buffer
//! cache reads it to stamp a buffer's last-release time for LRU eviction.
//! A 64-bit counter is used instead of xv6's 32-bit one — at one tick per
//! timer interrupt it would take hundreds of years to wrap, instead of
//! a handful of months.

use crate::spinlock::SpinLock;

pub static TICKS: SpinLock<u64> = SpinLock::new(0, "ticks");

/// Returns the current tick count.
pub fn now() -> u64 {
    *TICKS.lock()
}

/// Advances the tick counter by one. Called from the timer interrupt
/// handler, which is out of scope for this crate.
pub fn tick() {
    *TICKS.lock() += 1;
}
