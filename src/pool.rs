use crate::error::PoolError;
use crate::handles::{Producer, Reader};
use crate::invariants::{
    debug_assert_bounded_lag, debug_assert_cursor_slot, debug_assert_reader_behind,
};
use crate::slot::{Record, Slot};
use crate::stats::PoolStats;
use std::alloc::{self, Layout};
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering, compiler_fence};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// The pool coordinates one producer and one reader through two unbounded u64
// indices; there are no locks, no condition variables, and no allocations
// after construction.
//
// ## Sequence Numbers
//
// `write_index` (W) counts slots the producer has claimed since birth;
// `read_index` (R) counts slots the reader has consumed, or holds the
// `DETACHED` sentinel. Both only grow. A u64 does not wrap on any realistic
// uptime, so the slot backing logical index i is simply `storage[i & (N-1)]`
// and no modular "wrap handling" exists anywhere. The sentinel
// `DETACHED = u64::MAX - N` makes the producer's admission test `W < R + N`
// true for every practical W, so a detached reader looks exactly like an
// infinitely fast one.
//
// ## Producer (claim path) — wait-free
//
// 1. Load `W` with Relaxed (only the producer writes W)
// 2. Load `R` with Relaxed (a stale value only under-reports reader
//    progress and sends us down the overwrite path early — harmless)
// 3. Not full: store `W + 1` with Release, publishing every record byte
//    written into the previous slot before the reader can observe the new W
// 4. Full: bump the overflow counter and hand out the slot at the current W
//    again — the newest unconsumed record is sacrificed so the producer
//    keeps going in a bounded number of steps, always
//
// ## Reader (consume path) — wait-free
//
// 1. Load `R` with Relaxed (only the reader writes R)
// 2. Releasing the previous slot: compiler fence, then store `R + 1` with
//    Relaxed. The fence keeps record loads from the released slot from
//    sinking below the store; on x86 that is all the hardware needs
// 3. Load `W` with Acquire, pairing with the producer's Release store:
//    every record byte in slots below the observed W is visible
// 4. Return the slot at `R + 1` iff `W > R + 1` — a slot becomes readable
//    once the producer has claimed a *later* one
//
// ## Attach — the one seq-cst point
//
// An attaching reader proposes `R = W - 1` with a SeqCst store, then
// re-reads W. Either the producer's next admission check sees the proposed
// anchor, or the re-read sees the producer's subsequent advance and the
// loop re-anchors. Everything else in the pool uses the weakest ordering
// that preserves visibility.
//
// ## Single-Writer Invariants
//
// - `write_index`: written by the producer only
// - `read_index`: written by the reader only (attach, release, detach)
// - `overflow_count`: written by the producer only; readers are advisory,
//   so a Relaxed load/store pair is enough
// - slot at W: written by the producer only; slots in (R, W): read by the
//   reader only. The two overlap solely when the pool is full and the
//   producer re-writes the newest slot — that race is documented, not
//   prevented.
//
// =============================================================================

/// Cache line granularity the pool header and slot storage are aligned to.
pub const CACHE_LINE: usize = 64;

/// Wait-free single-producer/single-consumer buffer pool.
///
/// The sample-collection backbone of a low-overhead profiler: a
/// high-frequency producer deposits fixed-size records into slots of `B`
/// elements of `T`, a lower-priority reader drains them at its own pace.
/// The producer never blocks, never spins, and never fails to obtain a
/// write target; a lagging reader loses the freshest data instead.
///
/// `N` is the slot count and must be a power of two greater than one —
/// checked at compile time, along with the header fitting a single cache
/// line.
///
/// The low-level operations on this type are `unsafe` because they trust
/// the caller to uphold the single-producer/single-reader contract; the
/// [`split`](SamplePool::split) handles enforce it in safe code.
#[repr(C, align(64))]
pub struct SamplePool<T, const B: usize, const N: usize> {
    /// Slots claimed by the producer since birth. Producer-owned.
    write_index: AtomicU64,
    /// Slots consumed by the reader, or `DETACHED`. Reader-owned.
    read_index: AtomicU64,
    /// The `N`-slot backing region: cache-line aligned, zero-filled at
    /// construction so every slot page is resident before the first claim.
    storage: NonNull<Slot<T, B>>,
    /// Producer claims that could not advance the write index.
    overflow_count: AtomicU64,
    /// Pads the header to exactly one cache line.
    _pad: [u8; CACHE_LINE - 32],
}

// SAFETY: all cross-thread access to storage is coordinated through the
// atomic indices, records are plain data, and the role-exclusive operations
// put the single-producer/single-reader contract on their callers.
unsafe impl<T: Send, const B: usize, const N: usize> Send for SamplePool<T, B, N> {}
unsafe impl<T: Send, const B: usize, const N: usize> Sync for SamplePool<T, B, N> {}

impl<T, const B: usize, const N: usize> SamplePool<T, B, N> {
    /// Read index value meaning no reader is attached.
    ///
    /// Chosen so `R + N` is exactly `u64::MAX`: the admission test
    /// `W < R + N` cannot fail for any write index a real process will
    /// ever reach, and the overflow counter stays at zero for any finite
    /// detached run.
    pub const DETACHED: u64 = u64::MAX - N as u64;

    const INDEX_MASK: u64 = N as u64 - 1;

    // Compile-time validation, referenced from `new`.
    const VALID: () = {
        assert!(
            N > 1 && N.is_power_of_two(),
            "pool size must be a power of two greater than one"
        );
        assert!(B > 0, "slots must hold at least one record");
        assert!(
            mem::size_of::<T>() > 0,
            "zero-sized record types are unsupported"
        );
        assert!(
            mem::size_of::<Self>() == CACHE_LINE,
            "pool header expected to occupy exactly one cache line"
        );
    };

    /// Creates a pool with no reader attached and all slots zeroed.
    ///
    /// The backing region is allocated once, cache-line aligned, and
    /// zero-filled (prefaulting every slot page). This is the only
    /// operation that can fail at runtime.
    pub fn new() -> Result<Self, PoolError>
    where
        T: Record,
    {
        let () = Self::VALID;

        let layout = Self::storage_layout()?;
        // SAFETY: the layout has non-zero size (B > 0, N > 1, T is not
        // zero-sized, all checked above).
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let storage = NonNull::new(ptr.cast::<Slot<T, B>>()).ok_or(PoolError::AllocationFailed {
            bytes: layout.size(),
        })?;

        Ok(Self {
            write_index: AtomicU64::new(0),
            read_index: AtomicU64::new(Self::DETACHED),
            storage,
            overflow_count: AtomicU64::new(0),
            _pad: [0; CACHE_LINE - 32],
        })
    }

    fn storage_layout() -> Result<Layout, PoolError> {
        let slot_bytes = mem::size_of::<Slot<T, B>>();
        let align = mem::align_of::<Slot<T, B>>().max(CACHE_LINE);
        let size = slot_bytes
            .checked_mul(N)
            .ok_or(PoolError::InvalidLayout {
                slots: N,
                slot_bytes,
                align,
            })?;
        Layout::from_size_align(size, align).map_err(|_| PoolError::InvalidLayout {
            slots: N,
            slot_bytes,
            align,
        })
    }

    // ---------------------------------------------------------------------
    // CONSTANTS & STATUS
    // ---------------------------------------------------------------------

    /// Number of slots in the pool.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of records per slot.
    #[inline]
    pub const fn slot_len(&self) -> usize {
        B
    }

    /// The slot backing a logical index. Power-of-two pool size turns the
    /// modulus into a mask.
    #[inline]
    fn slot_ptr(&self, index: u64) -> *mut Slot<T, B> {
        // SAFETY: the mask keeps the offset below N; the region holds N
        // slots for the pool's whole lifetime.
        unsafe { self.storage.as_ptr().add((index & Self::INDEX_MASK) as usize) }
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Claims the next writable slot. Never fails, never blocks.
    ///
    /// If the pool is not full, advances the write index and returns the
    /// newly claimed slot; the Release store doubles as the publication
    /// point for every record written into the previous slot.
    ///
    /// If the pool is full, the write index stays put, the overflow
    /// counter is bumped, and the most recently claimed slot is handed out
    /// again: the newest unconsumed record is overwritten so the producer
    /// makes progress in a bounded number of steps no matter what the
    /// reader does.
    ///
    /// # Safety
    ///
    /// Must be called from the single producer thread only. The returned
    /// slot is valid for writing until the next call.
    #[inline]
    pub unsafe fn next_writable_buffer(&self) -> *mut Slot<T, B> {
        let mut windex = self.write_index.load(Ordering::Relaxed);
        let rindex = self.read_index.load(Ordering::Relaxed);

        if windex < rindex + N as u64 {
            windex += 1;
            // Release: record stores into the previous slot must not sink
            // below the index publication.
            self.write_index.store(windex, Ordering::Release);
        } else {
            // Single-writer counter; Relaxed load/store is all the
            // diagnostics need.
            let overflows = self.overflow_count.load(Ordering::Relaxed);
            self.overflow_count.store(overflows + 1, Ordering::Relaxed);
        }

        debug_assert_bounded_lag!(windex, rindex, N as u64);
        self.slot_ptr(windex)
    }

    // ---------------------------------------------------------------------
    // READER API
    // ---------------------------------------------------------------------

    /// Hands back the previously returned slot (if any) and returns the
    /// next slot with data, or `None` when the reader has caught up.
    ///
    /// A slot becomes readable once the producer has claimed a *later*
    /// slot: the Release store that publishes slot `i`'s records is the
    /// claim of slot `i + 1`.
    ///
    /// # Safety
    ///
    /// Must be called from the single attached reader thread only. `prev`
    /// must be exactly the slot returned by the previous call (or `None`
    /// on the first call after attaching). The returned borrow is valid
    /// until the next call to this function, `attach_reader`, or
    /// `detach_reader`.
    pub unsafe fn next_readable_buffer(&self, prev: Option<&Slot<T, B>>) -> Option<&Slot<T, B>> {
        let mut rindex = self.read_index.load(Ordering::Relaxed);

        if let Some(prev) = prev {
            rindex += 1;
            debug_assert_cursor_slot!(prev, self.slot_ptr(rindex));
            // Record loads from the released slot must complete before the
            // producer can observe the read index advancing. Loads do not
            // pass stores on x86; the fence pins the compiler down.
            compiler_fence(Ordering::SeqCst);
            self.read_index.store(rindex, Ordering::Relaxed);
        }

        // Acquire: pairs with the producer's Release store, making every
        // record byte in slots below the observed write index visible.
        let windex = self.write_index.load(Ordering::Acquire);
        if prev.is_some() {
            debug_assert_reader_behind!(rindex, windex);
        }

        if windex > rindex + 1 {
            // SAFETY: slot R + 1 lies in (R, W): fully published by the
            // producer and not written again until the reader's own
            // progress allows the index to lap.
            Some(unsafe { &*self.slot_ptr(rindex + 1) })
        } else {
            None
        }
    }

    /// Attaches a reader, anchoring it one slot behind the producer.
    ///
    /// Returns the `(read_index, write_index)` snapshot at return time. At
    /// most one slot of history is immediately readable, and the bound
    /// `W - R <= N` is re-established. The retry loop only runs again if
    /// the producer laps the proposed anchor mid-attach; attach is a rare,
    /// non-hot-path event, so the theoretically unbounded retry is
    /// acceptable.
    ///
    /// # Safety
    ///
    /// Must be called from the single reader thread, with no reader
    /// currently attached (or by the attached reader itself, which
    /// re-anchors and forfeits any unread slots).
    pub unsafe fn attach_reader(&self) -> (u64, u64) {
        let mut windex = self.write_index.load(Ordering::Relaxed);
        loop {
            let rindex = windex.saturating_sub(1);
            // The one SeqCst store in the pool: either the producer's next
            // admission check sees this anchor, or the reload below sees
            // the producer's advance and we re-anchor.
            self.read_index.store(rindex, Ordering::SeqCst);
            windex = self.write_index.load(Ordering::Relaxed);
            if windex <= rindex + N as u64 {
                debug_assert_reader_behind!(rindex, windex);
                return (rindex, windex);
            }
        }
    }

    /// Detaches the reader, returning the `(read_index, write_index)`
    /// snapshot taken just before the sentinel is installed.
    ///
    /// After this returns the producer's admission check always succeeds
    /// and the pool behaves as if no reader exists.
    ///
    /// # Safety
    ///
    /// Must be called from the single reader thread. Any slot borrowed
    /// from `next_readable_buffer` is invalidated.
    pub unsafe fn detach_reader(&self) -> (u64, u64) {
        // In-flight record loads must finish before the pool reverts to
        // unconstrained overwrite mode.
        compiler_fence(Ordering::SeqCst);
        let rindex = self.read_index.load(Ordering::Relaxed);
        let windex = self.write_index.load(Ordering::Relaxed);
        self.read_index.store(Self::DETACHED, Ordering::Relaxed);
        (rindex, windex)
    }

    // ---------------------------------------------------------------------
    // DIAGNOSTICS
    // ---------------------------------------------------------------------

    /// Slots claimed by the producer since birth. Relaxed; advisory.
    #[inline]
    pub fn write_index(&self) -> u64 {
        self.write_index.load(Ordering::Relaxed)
    }

    /// Slots consumed by the reader, or [`DETACHED`](Self::DETACHED).
    /// Relaxed; advisory.
    #[inline]
    pub fn read_index(&self) -> u64 {
        self.read_index.load(Ordering::Relaxed)
    }

    /// Producer claims that could not advance the write index because the
    /// reader was `N` slots behind. Relaxed; advisory.
    #[inline]
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Whether a reader is currently attached. Relaxed; advisory.
    #[inline]
    pub fn is_reader_attached(&self) -> bool {
        self.read_index() != Self::DETACHED
    }

    /// Takes an advisory snapshot of the pool's indices and counters.
    pub fn stats(&self) -> PoolStats {
        // R before W: W only grows, so an attached snapshot always
        // satisfies read_index <= write_index.
        let read_index = self.read_index.load(Ordering::Relaxed);
        let write_index = self.write_index.load(Ordering::Relaxed);
        PoolStats {
            write_index,
            read_index,
            overflow_count: self.overflow_count.load(Ordering::Relaxed),
            reader_attached: read_index != Self::DETACHED,
        }
    }

    /// Returns the slot behind the current write index with no
    /// synchronization whatsoever.
    ///
    /// Both indices keep moving while the caller looks, and the producer
    /// may be mid-write into the returned slot. Intended only for
    /// crash-time forensic dumps.
    pub fn peek_racy(&self) -> *const Slot<T, B> {
        let windex = self.write_index.load(Ordering::Relaxed);
        self.slot_ptr(windex)
    }

    // ---------------------------------------------------------------------
    // HANDLES
    // ---------------------------------------------------------------------

    /// Splits the pool into its two role handles.
    ///
    /// The `&mut` borrow makes a second split impossible while either
    /// handle is alive, which is what upholds the single-producer/
    /// single-reader contract in safe code. Both handles can be moved to
    /// their own threads (e.g. under `std::thread::scope`).
    pub fn split(&mut self) -> (Producer<'_, T, B, N>, Reader<'_, T, B, N>) {
        let pool = &*self;
        (Producer::new(pool), Reader::new(pool))
    }
}

impl<T, const B: usize, const N: usize> Drop for SamplePool<T, B, N> {
    fn drop(&mut self) {
        // Records are Copy; only the region itself needs releasing. The
        // layout was validated at construction.
        if let Ok(layout) = Self::storage_layout() {
            // SAFETY: storage came from alloc_zeroed with this layout.
            unsafe { alloc::dealloc(self.storage.as_ptr().cast(), layout) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Pool = SamplePool<u64, 4, 4>;

    #[test]
    fn test_construction_state() {
        let pool = Pool::new().unwrap();
        assert_eq!(pool.write_index(), 0);
        assert_eq!(pool.read_index(), Pool::DETACHED);
        assert_eq!(pool.overflow_count(), 0);
        assert!(!pool.is_reader_attached());
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.slot_len(), 4);
    }

    #[test]
    fn test_storage_is_zeroed() {
        let pool = Pool::new().unwrap();
        // Quiescent pool: nothing races the peek.
        let slot = unsafe { &*pool.peek_racy() };
        assert_eq!(slot.records(), &[0u64; 4]);
    }

    #[test]
    fn test_header_occupies_one_cache_line() {
        assert_eq!(mem::size_of::<Pool>(), CACHE_LINE);
        assert_eq!(mem::align_of::<Pool>(), CACHE_LINE);
    }

    #[test]
    fn test_claim_advances_write_index() {
        let pool = Pool::new().unwrap();
        for expected in 1..=3u64 {
            let slot = unsafe { pool.next_writable_buffer() };
            assert_eq!(pool.write_index(), expected);
            // The claimed slot is the one backing the new write index.
            assert_eq!(slot.cast_const(), pool.peek_racy());
        }
    }

    #[test]
    fn test_detached_claims_never_overflow() {
        let pool = Pool::new().unwrap();
        for _ in 0..3 * 4 {
            unsafe { pool.next_writable_buffer() };
        }
        assert_eq!(pool.write_index(), 12);
        assert_eq!(pool.overflow_count(), 0);
    }

    #[test]
    fn test_full_pool_overwrites_newest() {
        let pool = Pool::new().unwrap();
        let (rindex, windex) = unsafe { pool.attach_reader() };
        assert_eq!((rindex, windex), (0, 0));

        for _ in 0..3 {
            unsafe { pool.next_writable_buffer() };
        }
        let fourth = unsafe { pool.next_writable_buffer() };
        assert_eq!(pool.write_index(), 4);

        // Fifth claim: full. Same slot again, overflow bumped, the write
        // index frozen.
        let clobbered = unsafe { pool.next_writable_buffer() };
        assert_eq!(clobbered, fourth);
        assert_eq!(pool.write_index(), 4);
        assert_eq!(pool.overflow_count(), 1);
    }

    #[test]
    fn test_attach_on_empty_pool() {
        let pool = Pool::new().unwrap();
        assert_eq!(unsafe { pool.attach_reader() }, (0, 0));
        assert!(pool.is_reader_attached());
        assert!(unsafe { pool.next_readable_buffer(None) }.is_none());
    }

    #[test]
    fn test_write_then_read_cycle() {
        let pool = Pool::new().unwrap();
        unsafe { pool.attach_reader() };

        unsafe {
            (*pool.next_writable_buffer())
                .records_mut()
                .copy_from_slice(&[1, 2, 3, 4]);
            // The next claim publishes the previous slot.
            pool.next_writable_buffer();
        }

        let slot = unsafe { pool.next_readable_buffer(None) }.expect("published slot");
        assert_eq!(slot.records(), &[1, 2, 3, 4]);
        assert!(unsafe { pool.next_readable_buffer(Some(slot)) }.is_none());
        assert_eq!(pool.read_index(), 1);
    }

    #[test]
    fn test_detach_attach_roundtrip() {
        let pool = Pool::new().unwrap();
        unsafe { pool.attach_reader() };
        for _ in 0..3 {
            unsafe { pool.next_writable_buffer() };
        }

        let (rindex, windex) = unsafe { pool.detach_reader() };
        assert_eq!((rindex, windex), (0, 3));
        assert!(!pool.is_reader_attached());

        // No intervening producer activity: attach lands at (W - 1, W).
        assert_eq!(unsafe { pool.attach_reader() }, (2, 3));
    }

    #[test]
    fn test_stats_snapshot() {
        let pool = Pool::new().unwrap();
        unsafe {
            pool.attach_reader();
            pool.next_writable_buffer();
            pool.next_writable_buffer();
        }
        let stats = pool.stats();
        assert_eq!(stats.write_index, 2);
        assert_eq!(stats.read_index, 0);
        assert_eq!(stats.overflow_count, 0);
        assert!(stats.reader_attached);
        assert_eq!(stats.backlog(), 2);
    }

    #[test]
    fn test_smallest_valid_pool() {
        let pool = SamplePool::<u64, 4, 2>::new().unwrap();
        unsafe {
            pool.attach_reader();
            (*pool.next_writable_buffer()).records_mut()[0] = 7;
            pool.next_writable_buffer();
        }
        let slot = unsafe { pool.next_readable_buffer(None) }.expect("published slot");
        assert_eq!(slot.records()[0], 7);
        // Third claim against a stalled reader: pool of two is full.
        unsafe { pool.next_writable_buffer() };
        assert_eq!(pool.overflow_count(), 1);
    }
}
