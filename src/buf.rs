//! Buffer cache: cached copies of disk blocks, shared and synchronized
//! across CPUs.
//!
//! The cache is sharded into [`param::NBUCKET`](crate::param::NBUCKET) hash
//! buckets, each with its own spin lock, so that hits and within-bucket
//! evictions never contend with traffic on an unrelated block number. The
//! rare cross-bucket steal is the only path that needs a lock spanning two
//! buckets, and [`BCache::rebind_lock`] exists solely to keep two CPUs from
//! deadlocking while both try to steal from each other.
//!
//! Interface:
//! * To get a buffer for a particular disk block, call [`BCache::bread`].
//! * After changing buffer data, call [`BCache::bwrite`] to write it to disk.
//! * When done with the buffer, call [`BCache::brelse`].
//! * Do not use the buffer after calling `brelse`.
//! * Only one caller at a time can use a buffer, so do not keep it longer
//!   than necessary.

use core::cell::UnsafeCell;
use core::mem::{self, MaybeUninit};

use crate::clock;
use crate::param::{BSIZE, NBUCKET, NBUF};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::{SpinLock, SpinLockGuard};
use crate::virtio_disk;

/// Metadata for one buffer slot, protected by whichever bucket's lock
/// currently owns the slot (see [`BCache::bucket_of`]).
struct BufMeta {
    dev: u32,
    blockno: u32,
    refcnt: u32,
    /// Tick at which `refcnt` last dropped to zero; the LRU key.
    tick: u64,
    /// Next slot in this bucket's singly-linked list.
    next: Option<usize>,
}

impl BufMeta {
    const fn new() -> Self {
        Self {
            dev: 0,
            blockno: 0,
            refcnt: 0,
            tick: 0,
            next: None,
        }
    }
}

/// Buffer data, protected by the slot's [`SleepLock`] once bound.
pub struct BufData {
    valid: bool,
    data: [u8; BSIZE],
}

impl BufData {
    const fn new() -> Self {
        Self {
            valid: false,
            data: [0; BSIZE],
        }
    }
}

/// A singly-linked list of buffer slots, all hashing to the same bucket.
struct Bucket {
    head: Option<usize>,
}

impl Bucket {
    const fn new() -> Self {
        Self { head: None }
    }
}

/// A locked buffer handle returned by [`BCache::bread`]/[`BCache::get`].
pub struct Buf<'a> {
    index: usize,
    dev: u32,
    blockno: u32,
    guard: SleepLockGuard<'a, BufData>,
}

impl Buf<'_> {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    pub fn data(&self) -> &[u8; BSIZE] {
        &self.guard.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        &mut self.guard.data
    }
}

pub static BCACHE: BCache = BCache::new();

/// The buffer cache.
pub struct BCache {
    /// One lock per hash bucket, each guarding that bucket's list and the
    /// `refcnt`/`tick`/`next` of every slot currently in it.
    buckets: [SpinLock<Bucket>; NBUCKET],
    /// Held only while moving a slot from one bucket to another.
    rebind_lock: SpinLock<()>,
    meta: [UnsafeCell<BufMeta>; NBUF],
    data: [SleepLock<BufData>; NBUF],
}

// Safety: `meta` is only ever touched through `BCache::meta`, whose safety
// contract requires the owning bucket's lock to be held, so sharing the
// cache across CPUs is sound.
unsafe impl Sync for BCache {}

impl BCache {
    const fn new() -> Self {
        let buckets = {
            let mut array: [MaybeUninit<SpinLock<Bucket>>; NBUCKET] =
                unsafe { MaybeUninit::uninit().assume_init() };
            let mut i = 0;
            while i < NBUCKET {
                array[i] = MaybeUninit::new(SpinLock::new(Bucket::new(), "bucket"));
                i += 1;
            }
            unsafe { mem::transmute(array) }
        };

        let meta = {
            let mut array: [MaybeUninit<UnsafeCell<BufMeta>>; NBUF] =
                unsafe { MaybeUninit::uninit().assume_init() };
            let mut i = 0;
            while i < NBUF {
                array[i] = MaybeUninit::new(UnsafeCell::new(BufMeta::new()));
                i += 1;
            }
            unsafe { mem::transmute(array) }
        };

        let data = {
            let mut array: [MaybeUninit<SleepLock<BufData>>; NBUF] =
                unsafe { MaybeUninit::uninit().assume_init() };
            let mut i = 0;
            while i < NBUF {
                array[i] = MaybeUninit::new(SleepLock::new(BufData::new(), "buffer"));
                i += 1;
            }
            unsafe { mem::transmute(array) }
        };

        Self {
            buckets,
            rebind_lock: SpinLock::new((), "bcache"),
            meta,
            data,
        }
    }

    fn bucket_of(blockno: u32) -> usize {
        blockno as usize % NBUCKET
    }

    /// # Safety
    /// Caller must hold the lock of the bucket this slot currently belongs
    /// to (or be in the single-threaded window during a rebind where no
    /// guard for this slot can exist yet).
    #[allow(clippy::mut_from_ref)]
    unsafe fn meta(&self, i: usize) -> &mut BufMeta {
        unsafe { &mut *self.meta[i].get() }
    }

    fn scan_bucket(&self, head: Option<usize>, dev: u32, blockno: u32) -> Option<usize> {
        let mut cur = head;
        while let Some(i) = cur {
            let m = unsafe { self.meta(i) };
            if m.dev == dev && m.blockno == blockno {
                return Some(i);
            }
            cur = m.next;
        }
        None
    }

    /// Returns the zero-refcnt slot in this bucket with the smallest tick.
    fn lru_in_bucket(&self, head: Option<usize>) -> Option<(usize, u64)> {
        let mut best: Option<(usize, u64)> = None;
        let mut cur = head;
        while let Some(i) = cur {
            let m = unsafe { self.meta(i) };
            let better = match best {
                None => true,
                Some((_, t)) => m.tick < t,
            };
            if m.refcnt == 0 && better {
                best = Some((i, m.tick));
            }
            cur = m.next;
        }
        best
    }

    fn detach(&self, bucket: &mut Bucket, target: usize) {
        if bucket.head == Some(target) {
            bucket.head = unsafe { self.meta(target) }.next;
            return;
        }
        let mut cur = bucket.head;
        while let Some(i) = cur {
            let next = unsafe { self.meta(i) }.next;
            if next == Some(target) {
                unsafe { self.meta(i) }.next = unsafe { self.meta(target) }.next;
                return;
            }
            cur = next;
        }
    }

    fn insert_front(&self, bucket: &mut Bucket, i: usize) {
        unsafe { self.meta(i) }.next = bucket.head;
        bucket.head = Some(i);
    }

    /// Locks two buckets in ascending id order, returning guards in
    /// `(a, b)` order regardless of which was acquired first.
    fn lock_two(&self, a: usize, b: usize) -> (SpinLockGuard<'_, Bucket>, SpinLockGuard<'_, Bucket>) {
        debug_assert_ne!(a, b);
        if a < b {
            let la = self.buckets[a].lock();
            let lb = self.buckets[b].lock();
            (la, lb)
        } else {
            let lb = self.buckets[b].lock();
            let la = self.buckets[a].lock();
            (la, lb)
        }
    }

    /// Looks through the buffer cache for `(dev, blockno)`. If not found,
    /// evicts a buffer for it. Either way, returns the slot locked.
    fn get(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let id = Self::bucket_of(blockno);

        // Phase 1: fast path, hit in our own bucket.
        let mut bucket = self.buckets[id].lock();
        if let Some(i) = self.scan_bucket(bucket.head, dev, blockno) {
            unsafe { self.meta(i) }.refcnt += 1;
            drop(bucket);
            let guard = self.data[i].lock();
            return Buf { index: i, dev, blockno, guard };
        }
        drop(bucket);

        // Phase 2: evict a buffer from our own bucket.
        let rebind = self.rebind_lock.lock();
        let mut bucket = self.buckets[id].lock();

        // Another CPU may have cached this block while we held no lock;
        // re-checking here is what keeps the no-duplicates invariant
        // intact.
        if let Some(i) = self.scan_bucket(bucket.head, dev, blockno) {
            unsafe { self.meta(i) }.refcnt += 1;
            drop(bucket);
            drop(rebind);
            let guard = self.data[i].lock();
            return Buf { index: i, dev, blockno, guard };
        }

        if let Some((i, _)) = self.lru_in_bucket(bucket.head) {
            let m = unsafe { self.meta(i) };
            m.dev = dev;
            m.blockno = blockno;
            m.refcnt = 1;
            drop(bucket);
            drop(rebind);
            // The content lock is always acquired outside any spin lock,
            // so both bucket locks are gone before we take it.
            let mut guard = self.data[i].lock();
            guard.valid = false;
            return Buf { index: i, dev, blockno, guard };
        }
        drop(bucket);

        // Phase 3: steal the globally least-recently-used buffer from
        // some other bucket. `rebind` stays held for the rest of this
        // call; bucket `id` is released while we scan.
        loop {
            let mut donor: Option<(usize, usize, u64)> = None;
            for other in (0..NBUCKET).filter(|&b| b != id) {
                let b = self.buckets[other].lock();
                if let Some((i, tick)) = self.lru_in_bucket(b.head) {
                    let better = match donor {
                        None => true,
                        Some((_, _, t)) => tick < t,
                    };
                    if better {
                        donor = Some((other, i, tick));
                    }
                }
            }

            let (donor_id, victim, _) = match donor {
                Some(d) => d,
                None => panic!("bget: no buffers"),
            };

            let (mut donor_bucket, mut dest_bucket) = self.lock_two(donor_id, id);

            // Mandated re-check: the block may have been inserted into
            // bucket `id` by another CPU while we were scanning for a
            // donor.
            if let Some(i) = self.scan_bucket(dest_bucket.head, dev, blockno) {
                unsafe { self.meta(i) }.refcnt += 1;
                drop(dest_bucket);
                drop(donor_bucket);
                drop(rebind);
                let guard = self.data[i].lock();
                return Buf { index: i, dev, blockno, guard };
            }

            // The victim may have been claimed by a Phase-1 hit on its own
            // bucket between the scan above and now; if so, start over.
            if unsafe { self.meta(victim) }.refcnt != 0 {
                drop(dest_bucket);
                drop(donor_bucket);
                continue;
            }

            self.detach(&mut donor_bucket, victim);
            let m = unsafe { self.meta(victim) };
            m.dev = dev;
            m.blockno = blockno;
            m.refcnt = 1;
            self.insert_front(&mut dest_bucket, victim);

            drop(dest_bucket);
            drop(donor_bucket);
            drop(rebind);

            let mut guard = self.data[victim].lock();
            guard.valid = false;
            return Buf { index: victim, dev, blockno, guard };
        }
    }

    /// Returns a locked buffer with the contents of the indicated block,
    /// reading it from disk first if it wasn't already cached.
    pub fn bread(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let mut buf = self.get(dev, blockno);
        if !buf.guard.valid {
            // Safety: we hold `buf`'s content lock for the duration.
            unsafe { virtio_disk::rw(dev, blockno, &mut buf.guard.data, false) }
                .expect("bread: disk read failed");
            buf.guard.valid = true;
        }
        buf
    }

    /// Writes `buf`'s contents to disk. Caller must hold `buf`'s content
    /// lock, which the type of `buf` guarantees.
    pub fn bwrite(&self, buf: &mut Buf<'_>) {
        unsafe { virtio_disk::rw(buf.dev, buf.blockno, &mut buf.guard.data, true) }
            .expect("bwrite: disk write failed");
    }

    /// Releases a locked buffer, decrementing its reference count and
    /// recording the current tick if it drops to zero.
    pub fn brelse(&self, buf: Buf<'_>) {
        let index = buf.index;
        let blockno = buf.blockno;
        drop(buf.guard);

        let id = Self::bucket_of(blockno);
        let _bucket = self.buckets[id].lock();
        let m = unsafe { self.meta(index) };
        m.refcnt -= 1;
        if m.refcnt == 0 {
            // Read inside the bucket lock, per this cache's lock-ordering
            // rule: the ticks lock nests inside a bucket lock, never the
            // reverse.
            m.tick = clock::now();
        }
    }

    /// Increments a buffer's reference count without touching its content
    /// lock, so it survives eviction across an operation that doesn't hold
    /// the buffer locked the whole time (e.g. on-disk log commit).
    pub fn bpin(&self, buf: &Buf<'_>) {
        let id = Self::bucket_of(buf.blockno);
        let _bucket = self.buckets[id].lock();
        unsafe { self.meta(buf.index) }.refcnt += 1;
    }

    pub fn bunpin(&self, buf: &Buf<'_>) {
        let id = Self::bucket_of(buf.blockno);
        let _bucket = self.buckets[id].lock();
        unsafe { self.meta(buf.index) }.refcnt -= 1;
    }
}

/// Initializes the buffer cache, distributing slots across buckets.
///
/// # Safety
/// Must be called only once during kernel initialization.
pub unsafe fn init() {
    for i in 0..NBUF {
        let id = i % NBUCKET;
        let mut bucket = BCACHE.buckets[id].lock();
        BCACHE.insert_front(&mut bucket, i);
    }
    log::info!("buf: {NBUF} buffers across {NBUCKET} buckets");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn single_block_hit_reuses_cached_data() {
        let buf = BCACHE.bread(1, 42);
        let first = *buf.data();
        BCACHE.brelse(buf);

        let buf = BCACHE.bread(1, 42);
        assert_eq!(*buf.data(), first);
        BCACHE.brelse(buf);
    }

    #[test_case]
    fn refcnt_prevents_duplicate_binding() {
        let a = BCACHE.bread(2, 7);
        let b = BCACHE.bread(2, 7);
        assert_eq!(a.index, b.index);
        BCACHE.brelse(b);
        BCACHE.brelse(a);
    }

    #[test_case]
    fn pin_survives_across_pressure() {
        let buf = BCACHE.bread(3, 1);
        BCACHE.bpin(&buf);
        BCACHE.bunpin(&buf);
        BCACHE.brelse(buf);
    }

    #[test_case]
    fn bucket_collision_forces_within_bucket_lru_eviction() {
        let dev = 11;
        let bucket = 6;

        // `NBUF` (30) over `NBUCKET` (13) puts exactly two native slots in
        // every bucket past the first four, so two reads fill bucket 6.
        let older = BCACHE.bread(dev, bucket as u32);
        let newer = BCACHE.bread(dev, bucket as u32 + NBUCKET as u32);
        let older_index = older.index;
        let newer_index = newer.index;

        BCACHE.brelse(older);
        clock::tick();
        BCACHE.brelse(newer);

        // Bucket 6 is now full and every slot in it has refcnt 0; the
        // older release carries the smaller tick and must be the one
        // Phase 2 evicts in place.
        let third = bucket as u32 + 2 * NBUCKET as u32;
        let evicted_in = BCACHE.bread(dev, third);
        assert_eq!(evicted_in.dev(), dev);
        assert_eq!(evicted_in.blockno(), third);
        assert_eq!(evicted_in.index, older_index);
        assert_ne!(evicted_in.index, newer_index);
        BCACHE.brelse(evicted_in);
    }

    #[test_case]
    fn cross_bucket_steal_serves_a_fully_busy_bucket() {
        let dev = 12;
        let bucket = 8;

        // Hold both of bucket 8's native slots busy (refcnt > 0), so
        // Phase 2 finds nothing evictable in-bucket and Phase 3 must
        // steal a victim from some other bucket instead.
        let first = BCACHE.bread(dev, bucket as u32);
        let second = BCACHE.bread(dev, bucket as u32 + NBUCKET as u32);

        let third_no = bucket as u32 + 2 * NBUCKET as u32;
        let third = BCACHE.bread(dev, third_no);
        assert_eq!(third.dev(), dev);
        assert_eq!(third.blockno(), third_no);
        assert_ne!(third.index, first.index);
        assert_ne!(third.index, second.index);

        BCACHE.brelse(third);
        BCACHE.brelse(second);
        BCACHE.brelse(first);
    }
}
