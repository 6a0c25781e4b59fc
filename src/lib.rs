#![no_std]
#![cfg_attr(test, no_main)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::sync::atomic::{AtomicBool, Ordering};

#[macro_use]
pub mod printf;
#[macro_use]
pub mod error;

pub mod buf;
pub mod clock;
pub mod console;
pub mod kalloc;
pub mod logging;
pub mod memlayout;
pub mod param;
pub mod proc;
pub mod riscv;
pub mod sleeplock;
pub mod spinlock;
pub mod uart;
pub mod virtio_disk;

#[cfg(test)]
pub mod testing;

static STARTED: AtomicBool = AtomicBool::new(false);

/// Kernel entry point, called once per hart after `start.rs` (out of
/// scope for this crate) drops into supervisor mode.
#[cfg(not(test))]
pub extern "C" fn main() -> ! {
    let cpu_id = unsafe { proc::current_id() };

    if cpu_id == 0 {
        unsafe {
            console::init();

            println!();
            println!("kernel is booting");
            println!();

            logging::init().expect("logging::init: logger already set");
            kalloc::init();
            buf::init();
            virtio_disk::init();
        }

        println!();
        println!("hart {cpu_id} is up");

        STARTED.store(true, Ordering::SeqCst);
    } else {
        while !STARTED.load(Ordering::SeqCst) {
            core::hint::spin_loop();
        }

        println!("hart {cpu_id} is up");
    }

    #[allow(clippy::empty_loop)]
    loop {}
}

pub fn panic_handler(info: &core::panic::PanicInfo<'_>) -> ! {
    #[cfg(test)]
    testing::panic_handler(info);
    #[cfg(not(test))]
    printf::handle_panic(info)
}

#[cfg(test)]
#[unsafe(no_mangle)]
extern "C" fn main() -> ! {
    test_main();
    #[allow(clippy::empty_loop)]
    loop {}
}
