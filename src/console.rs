//! Thin wrapper over the UART, kept separate from [`crate::printf`] so a
//! future input path (keyboard/line discipline) has somewhere to live
//! without touching the formatting macros.

use crate::uart;

/// Writes a single byte to the console.
pub fn putc(c: u8) {
    uart::putc_sync(c);
}

/// Initializes the console.
///
/// # Safety
/// Must be called only once during kernel initialization.
pub unsafe fn init() {
    unsafe { uart::init() };
}
