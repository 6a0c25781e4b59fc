//! In-kernel test harness.
//!
//! There's no host process to run `cargo test` in: this binary boots
//! straight into QEMU on bare metal. `#[test_case]` functions run from
//! [`test_runner`] after the normal boot sequence, and the SiFive test
//! device's MMIO register is used to hand QEMU's exit code back to the
//! process driving it.

use core::panic::PanicInfo;
use core::ptr;

use crate::{print, println};

pub trait Testable {
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        print!("{}...\t", core::any::type_name::<T>());
        self();
        println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

pub fn panic_handler(info: &PanicInfo) -> ! {
    println!("[failed]");
    println!("{info}");
    exit_qemu(QemuExitCode::Failed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x5555,
    Failed = 0x3333,
}

const SIFIVE_TEST_BASE: usize = 0x100000;

pub fn exit_qemu(code: QemuExitCode) -> ! {
    unsafe { ptr::write_volatile(SIFIVE_TEST_BASE as *mut u32, code as u32) };
    // QEMU tears down the machine on the write above; this is only
    // reached if it didn't.
    #[allow(clippy::empty_loop)]
    loop {}
}
