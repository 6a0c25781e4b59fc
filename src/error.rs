//! Kernel error taxonomy.
//!
//! Precondition violations and resource exhaustion in the buffer cache
//! and page allocator are fatal or represented directly in a return type
//! (see `bget`'s `panic!` and `kalloc`'s `Option`); `KernelError` covers
//! the one boundary that still needs a distinct failure value: the
//! block device.

use core::fmt::{self, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The block device reported a read or write failure.
    DiskError,
}

impl Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::DiskError => write!(f, "disk error"),
        }
    }
}

/// Return an error, logging the call site first. Use instead of bare
/// `return Err(...)` at a fallible boundary.
#[macro_export]
macro_rules! err {
    ($e:expr) => {{
        log::warn!("{} at {}:{}", $e, file!(), line!());
        return Err($e.into());
    }};
}

/// Propagate an error with call-site logging. Use instead of `?` when the
/// failure is worth a breadcrumb in the kernel log.
#[macro_export]
macro_rules! try_log {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => {
                log::warn!("{} at {}:{}", e, file!(), line!());
                return Err(e.into());
            }
        }
    };
}
