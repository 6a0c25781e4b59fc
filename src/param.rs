//! Compile-time kernel configuration.
//!
//! These constants are the kernel's configuration layer: there is no
//! runtime config file, just values picked at build time, the same way
//! the rest of this codebase's ancestors size their tables.

/// Maximum number of CPUs.
pub const NCPU: usize = 8;

/// Number of hash buckets the buffer cache shards its LRU lists across.
/// A small prime spreads block numbers evenly and keeps per-bucket chains
/// short.
pub const NBUCKET: usize = 13;

/// Max number of blocks any single filesystem operation touches; buffer
/// cache and on-disk log are sized off of it.
pub const MAXOPBLOCKS: usize = 10;

/// Number of buffers in the buffer cache.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Device number of the file system root disk.
pub const ROOTDEV: u32 = 1;

/// Size in bytes of a disk block, and of the data half of a buffer.
pub const BSIZE: usize = 1024;
