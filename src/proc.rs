//! Per-CPU bookkeeping.
//!
//! A full kernel tracks one process struct per running task and
//! context-switches between them; process scheduling is out of scope
//! here. What's kept is the slice every lock in this crate is built on:
//! a stable, preemption-safe way to ask "which hart am I running on
//! right now".

use core::cell::UnsafeCell;
use core::mem::{transmute, MaybeUninit};

use crate::param::NCPU;
use crate::riscv::{interrupts, registers::tp};

pub static CPU_TABLE: CpuTable = CpuTable::new();

/// Per-CPU state: just the interrupt-disable nesting count needed to make
/// `push_off`/`pop_off` safe to call recursively.
pub struct Cpu {
    num_off: isize,
    interrupts_enabled: bool,
}

impl Cpu {
    const fn new() -> Self {
        Self {
            num_off: 0,
            interrupts_enabled: false,
        }
    }

    fn push_off(&mut self, old_state: bool) -> InterruptLock {
        if self.num_off == 0 {
            self.interrupts_enabled = old_state;
        }
        self.num_off += 1;
        InterruptLock { _private: () }
    }

    fn pop_off(&mut self) {
        assert!(!interrupts::get(), "pop_off - interruptible");
        assert!(self.num_off >= 1, "pop_off");

        self.num_off -= 1;
        if self.num_off == 0 && self.interrupts_enabled {
            interrupts::enable();
        }
    }
}

/// Table of per-CPU state, one slot per hart.
pub struct CpuTable([UnsafeCell<Cpu>; NCPU]);

unsafe impl Sync for CpuTable {}

impl CpuTable {
    const fn new() -> Self {
        let mut array: [MaybeUninit<UnsafeCell<Cpu>>; NCPU] =
            unsafe { MaybeUninit::uninit().assume_init() };
        let mut i = 0;
        while i < NCPU {
            array[i] = MaybeUninit::new(UnsafeCell::new(Cpu::new()));
            i += 1;
        }
        unsafe { transmute(array) }
    }
}

/// Returns the id of the hart executing this code.
///
/// # Safety
/// Must be called with interrupts disabled, otherwise the scheduler could
/// migrate this task to a different hart between the read and its use.
#[inline]
pub unsafe fn current_id() -> usize {
    unsafe { tp::read() }
}

fn current_cpu() -> &'static mut Cpu {
    assert!(!interrupts::get(), "current_cpu - interrupts enabled");
    // Safety: interrupts are disabled, so `current_id` is stable for the
    // duration of this borrow, and no other hart can alias this slot.
    unsafe { &mut *CPU_TABLE.0[current_id()].get() }
}

/// Returns a raw pointer identifying the current CPU's slot, for use as a
/// lock-ownership token (e.g. by [`crate::spinlock::SpinLock`]).
///
/// # Safety
/// Must be called with interrupts disabled.
pub unsafe fn current_cpu_ptr() -> *mut Cpu {
    assert!(!interrupts::get(), "current_cpu_ptr - interrupts enabled");
    CPU_TABLE.0[unsafe { current_id() }].get()
}

/// Disables interrupts on this hart and returns a guard that restores the
/// previous interrupt state when dropped. Calls nest: interrupts are only
/// actually re-enabled once the outermost guard is dropped.
pub fn lock_current_cpu() -> InterruptLock {
    let old_state = interrupts::get();
    interrupts::disable();
    current_cpu().push_off(old_state)
}

/// RAII guard produced by [`lock_current_cpu`]; also the caller's proof
/// that the current hart's id is safe to read for as long as it lives.
#[must_use]
pub struct InterruptLock {
    _private: (),
}

impl Drop for InterruptLock {
    fn drop(&mut self) {
        current_cpu().pop_off();
    }
}
