//! Sleeping lock: cooperative mutual exclusion for sections that may
//! block for a while (e.g. waiting on a disk read), where busy-waiting
//! with interrupts off would be unacceptable.
//!
//! A full kernel parks the waiter on a wait channel and context-switches
//! to another runnable process. Process scheduling is out of scope
//! here, so a waiter instead spins with interrupts enabled,
//! which preserves the contract that matters to callers in this crate —
//! the lock is acquired and released with no spin lock held across the
//! wait — without pulling in a scheduler.

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::proc;

const NO_HOLDER: usize = usize::MAX;

/// A lock that may be held across a long operation without disabling
/// interrupts or spinning with them off.
#[derive(Debug)]
pub struct SleepLock<T> {
    name: &'static str,
    locked: AtomicBool,
    holder: AtomicUsize,
    data: UnsafeCell<T>,
}

// Safety: access to the inner data is only ever granted through a
// `SleepLockGuard`, so sharing the lock across CPUs is safe as long as
// `T` is safe to send between them.
unsafe impl<T> Sync for SleepLock<T> where T: Send {}

impl<T> SleepLock<T> {
    pub const fn new(value: T, name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            holder: AtomicUsize::new(NO_HOLDER),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, waiting for the current holder to release it.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }

        let id = {
            let _intr_lock = proc::lock_current_cpu();
            // Safety: interrupts are disabled by `_intr_lock`.
            unsafe { proc::current_id() }
        };
        self.holder.store(id, Ordering::Relaxed);

        SleepLockGuard { lock: self }
    }

    /// Returns true if the current CPU holds this lock.
    pub fn holding(&self) -> bool {
        if !self.locked.load(Ordering::Relaxed) {
            return false;
        }
        let _intr_lock = proc::lock_current_cpu();
        // Safety: interrupts are disabled by `_intr_lock`.
        let id = unsafe { proc::current_id() };
        self.holder.load(Ordering::Relaxed) == id
    }

    /// # Safety
    /// Caller must ensure the lock is actually held, or that no other CPU
    /// can be touching the data.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

pub struct SleepLockGuard<'a, T: 'a> {
    lock: &'a SleepLock<T>,
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.holder.store(NO_HOLDER, Ordering::Relaxed);
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

// `SleepLockGuard` is intentionally `!Sync`: a guard is always held by a
// single logical owner and never needs to be shared by reference across
// CPUs the way a `SpinLockGuard` briefly is.
