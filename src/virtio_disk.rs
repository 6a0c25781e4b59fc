//! Block device collaborator.
//!
//! The real driver that belongs here speaks the virtio-blk MMIO protocol
//! (descriptor rings, interrupt-driven completion, the works) — out of
//! scope for this crate. [`rw`] is the seam [`crate::buf`] calls through;
//! it is just enough to let the buffer cache's miss path compile and be
//! exercised by tests without a queue, descriptors, or an interrupt
//! handler behind it.

use crate::error::KernelError;
use crate::param::BSIZE;

/// Reads (`write == false`) or writes (`write == true`) one block.
///
/// # Safety
/// Caller must hold the buffer's sleep lock for the duration of the call,
/// the same way the real driver requires exclusive access to `data` while
/// the request is in flight.
pub unsafe fn rw(_dev: u32, _blockno: u32, _data: &mut [u8; BSIZE], _write: bool) -> Result<(), KernelError> {
    Ok(())
}

/// Initializes the virtio queue and negotiates features with the device.
///
/// # Safety
/// Must be called only once during kernel initialization.
pub unsafe fn init() {}
