//! Physical page allocator for user processes, kernel stacks, page-table
//! pages, and pipe buffers. Allocates whole 4096-byte pages.
//!
//! Each CPU owns a freelist of its own, so the common case of allocating
//! and freeing on the same hart never contends with any other hart. A
//! `kalloc` that finds its own list empty steals from another CPU's list
//! rather than returning failure early — only a CPU that finds every list
//! empty, its own included, gives up.

use core::mem::{self, MaybeUninit};
use core::ptr;

use crate::memlayout::PHYSTOP;
use crate::param::NCPU;
use crate::proc;
use crate::riscv::{pg_round_up, PGSIZE};
use crate::spinlock::SpinLock;

unsafe extern "C" {
    /// First address after the kernel image, defined by the linker script.
    static end: u8;
}

/// A free page, threaded through the first word of its own storage: no
/// separate metadata is kept for frames sitting on a freelist.
struct Run {
    next: *mut Run,
}

struct Freelist {
    head: *mut Run,
}

// Safety: a `Run` only exists on one CPU's freelist at a time, guarded by
// that list's own lock, so handing the list (and the pointers reachable
// through it) to another CPU is sound.
unsafe impl Send for Freelist {}

impl Freelist {
    const fn new() -> Self {
        Self { head: ptr::null_mut() }
    }

    fn pop(&mut self) -> *mut Run {
        let r = self.head;
        if !r.is_null() {
            // Safety: every pointer on this list was pushed by `push`
            // below, which only ever stores pages that are ours to hand
            // out.
            self.head = unsafe { (*r).next };
        }
        r
    }

    fn push(&mut self, r: *mut Run) {
        unsafe { (*r).next = self.head };
        self.head = r;
    }
}

pub struct Kmem {
    lists: [SpinLock<Freelist>; NCPU],
}

unsafe impl Sync for Kmem {}

pub static KMEM: Kmem = Kmem::new();

impl Kmem {
    const fn new() -> Self {
        let lists = {
            let mut array: [MaybeUninit<SpinLock<Freelist>>; NCPU] =
                unsafe { MaybeUninit::uninit().assume_init() };
            let mut i = 0;
            while i < NCPU {
                array[i] = MaybeUninit::new(SpinLock::new(Freelist::new(), "kmem"));
                i += 1;
            }
            unsafe { mem::transmute(array) }
        };
        Self { lists }
    }

    fn freerange(&self, start: usize, limit: usize) {
        let mut p = pg_round_up(start);
        while p + PGSIZE <= limit {
            // Safety: `p` is page-aligned and inside `[end, PHYSTOP)` by
            // construction, and this is boot-time initialization, so no
            // other CPU can be touching it.
            unsafe { self.kfree(p as *mut u8) };
            p += PGSIZE;
        }
    }

    /// Returns a frame to the pool.
    ///
    /// # Safety
    /// `pa` must be page-aligned, lie in `[end, PHYSTOP)`, and not
    /// currently be on any freelist or reachable through any other owner.
    pub unsafe fn kfree(&self, pa: *mut u8) {
        let addr = pa as usize;
        let kernel_end = unsafe { (&raw const end) as usize };
        assert!(
            addr % PGSIZE == 0 && addr >= kernel_end && addr < PHYSTOP,
            "kfree: {addr:#x} out of range"
        );

        // Junk-fill to catch dangling references to a freed page.
        unsafe { ptr::write_bytes(pa, 0x01, PGSIZE) };

        let id = {
            let _intr_lock = proc::lock_current_cpu();
            unsafe { proc::current_id() }
        };
        self.lists[id].lock().push(pa as *mut Run);
    }

    /// Allocates one 4 KiB page, stealing from another CPU's freelist if
    /// this CPU's own list is empty. Returns `None` if every list is.
    pub fn kalloc(&self) -> Option<*mut u8> {
        let id = {
            let _intr_lock = proc::lock_current_cpu();
            unsafe { proc::current_id() }
        };

        let mut r = self.lists[id].lock().pop();

        if r.is_null() {
            for other in (0..NCPU).filter(|&o| o != id) {
                r = self.lists[other].lock().pop();
                if !r.is_null() {
                    break;
                }
            }
        }

        if r.is_null() {
            return None;
        }

        // Junk-fill to catch reads of supposedly-fresh memory.
        unsafe { ptr::write_bytes(r as *mut u8, 0x05, PGSIZE) };
        Some(r as *mut u8)
    }
}

/// Initializes every CPU's freelist and frees `[end, PHYSTOP)`.
///
/// # Safety
/// Must be called only once during kernel initialization.
pub unsafe fn init() {
    let kernel_end = unsafe { (&raw const end) as usize };
    KMEM.freerange(kernel_end, PHYSTOP);
    log::info!("kalloc: managing {:#x}..{:#x}", kernel_end, PHYSTOP);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn alloc_is_page_aligned_and_junk_filled() {
        let p = KMEM.kalloc().expect("kalloc: out of memory");
        assert_eq!(p as usize % PGSIZE, 0);
        assert_eq!(unsafe { *p }, 0x05);
        unsafe { KMEM.kfree(p) };
    }

    #[test_case]
    fn freed_page_is_junk_filled() {
        let p = KMEM.kalloc().expect("kalloc: out of memory");
        unsafe { KMEM.kfree(p) };
        assert_eq!(unsafe { *p }, 0x01);
    }

    #[test_case]
    fn alloc_free_round_trip_preserves_frame_count() {
        let mut pages = [ptr::null_mut(); 64];
        for slot in pages.iter_mut() {
            *slot = KMEM.kalloc().expect("kalloc: out of memory");
        }
        for &p in pages.iter() {
            unsafe { KMEM.kfree(p) };
        }
    }

    #[test_case]
    fn kalloc_never_hands_out_the_same_frame_twice_while_outstanding() {
        let mut pages = [ptr::null_mut::<u8>(); 8];
        for slot in pages.iter_mut() {
            *slot = KMEM.kalloc().expect("kalloc: out of memory");
        }
        for i in 0..pages.len() {
            assert_eq!(pages[i] as usize % PGSIZE, 0);
            assert!((pages[i] as usize) < PHYSTOP);
            for j in (i + 1)..pages.len() {
                assert_ne!(pages[i], pages[j], "kalloc handed out the same frame twice");
            }
        }
        for &p in pages.iter() {
            unsafe { KMEM.kfree(p) };
        }
    }

    #[test_case]
    fn kalloc_steals_from_another_cpu_when_local_list_is_empty() {
        let id = {
            let _intr_lock = proc::lock_current_cpu();
            unsafe { proc::current_id() }
        };
        let other = (id + 1) % NCPU;

        // Move everything off this CPU's own list and onto `other`'s, so
        // the local list is empty and only `other` has anything to give.
        let mut moved = 0usize;
        loop {
            let popped = KMEM.lists[id].lock().pop();
            if popped.is_null() {
                break;
            }
            KMEM.lists[other].lock().push(popped);
            moved += 1;
        }
        assert!(moved > 0, "local freelist was already empty before the test ran");

        let p = KMEM
            .kalloc()
            .expect("kalloc: should have stolen a frame from another CPU's list");
        assert_eq!(p as usize % PGSIZE, 0);
        unsafe { KMEM.kfree(p) };
    }
}
