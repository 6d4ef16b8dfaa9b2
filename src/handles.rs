//! Safe role handles over the pool.
//!
//! [`SamplePool::split`] hands out exactly one [`Producer`] and one
//! [`Reader`]; the `&mut` borrow it takes keeps a second pair from ever
//! existing while these are alive. Neither handle is `Clone` — a second
//! producer or reader would break the single-writer ownership of the
//! indices that keeps both paths wait-free.

use crate::pool::SamplePool;
use crate::slot::Slot;
use crate::stats::PoolStats;
use std::ptr::NonNull;

/// Producer-side handle: claims writable slots.
pub struct Producer<'a, T, const B: usize, const N: usize> {
    pool: &'a SamplePool<T, B, N>,
}

// SAFETY: the handle is the sole producer; the pool's atomics coordinate
// everything it shares with the reader.
unsafe impl<T: Send, const B: usize, const N: usize> Send for Producer<'_, T, B, N> {}
unsafe impl<T: Send, const B: usize, const N: usize> Sync for Producer<'_, T, B, N> {}

impl<'a, T, const B: usize, const N: usize> Producer<'a, T, B, N> {
    pub(crate) fn new(pool: &'a SamplePool<T, B, N>) -> Self {
        Self { pool }
    }

    /// Claims the next writable slot. Never fails, never blocks.
    ///
    /// Claiming publishes every record written into the previously claimed
    /// slot. When the pool is full, the most recently claimed slot is
    /// handed out again and the overflow counter is bumped; see
    /// [`SamplePool::next_writable_buffer`].
    #[inline]
    pub fn next_writable_buffer(&mut self) -> &mut Slot<T, B> {
        // SAFETY: `split` hands out exactly one producer and this method
        // takes `&mut self`, so claims are serialized; the returned borrow
        // keeps the slot exclusive to the caller until the next claim.
        unsafe { &mut *self.pool.next_writable_buffer() }
    }

    /// Producer claims that could not advance the write index.
    #[inline]
    pub fn overflow_count(&self) -> u64 {
        self.pool.overflow_count()
    }

    /// Advisory snapshot of the pool's indices and counters.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

/// Reader-side handle: owns the attach/detach lifecycle and the cursor of
/// the slot currently borrowed for reading.
///
/// A freshly split reader is detached; [`next_readable_buffer`] returns
/// `None` until [`attach`] is called. Dropping an attached reader
/// detaches it.
///
/// [`attach`]: Reader::attach
/// [`next_readable_buffer`]: Reader::next_readable_buffer
pub struct Reader<'a, T, const B: usize, const N: usize> {
    pool: &'a SamplePool<T, B, N>,
    /// Slot returned by the previous `next_readable_buffer` call, handed
    /// back on the next one.
    cursor: Option<NonNull<Slot<T, B>>>,
    attached: bool,
}

// SAFETY: the handle is the sole reader; the pool's atomics coordinate
// everything it shares with the producer.
unsafe impl<T: Send, const B: usize, const N: usize> Send for Reader<'_, T, B, N> {}
unsafe impl<T: Send, const B: usize, const N: usize> Sync for Reader<'_, T, B, N> {}

impl<'a, T, const B: usize, const N: usize> Reader<'a, T, B, N> {
    pub(crate) fn new(pool: &'a SamplePool<T, B, N>) -> Self {
        Self {
            pool,
            cursor: None,
            attached: false,
        }
    }

    /// Attaches the reader one slot behind the producer, returning the
    /// `(read_index, write_index)` snapshot.
    ///
    /// Re-attaching while already attached re-anchors the reader at the
    /// current write index and forfeits any unread slots.
    pub fn attach(&mut self) -> (u64, u64) {
        self.cursor = None;
        self.attached = true;
        // SAFETY: sole reader handle, and `&mut self` serializes its use.
        unsafe { self.pool.attach_reader() }
    }

    /// Detaches the reader, returning the final `(read_index,
    /// write_index)` snapshot. The producer reverts to unconstrained
    /// overwrite mode.
    pub fn detach(&mut self) -> (u64, u64) {
        self.cursor = None;
        self.attached = false;
        // SAFETY: sole reader handle.
        unsafe { self.pool.detach_reader() }
    }

    /// Whether the reader is currently attached.
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Hands back the previously returned slot and borrows the next
    /// readable one, or `None` when caught up (or detached).
    ///
    /// The borrow is valid until the next call on this reader; handing the
    /// slot back is what advances the read index and lets the producer
    /// reuse it.
    pub fn next_readable_buffer(&mut self) -> Option<&Slot<T, B>> {
        // SAFETY: the cursor is exactly the slot the pool returned last
        // call, still valid because only this method (and attach/detach,
        // which clear it) advances the reader.
        let prev = self.cursor.map(|ptr| unsafe { &*ptr.as_ptr() });
        // SAFETY: sole reader handle, serialized by `&mut self`.
        let next = unsafe { self.pool.next_readable_buffer(prev) };
        self.cursor = next.map(NonNull::from);
        next
    }

    /// Drains every currently readable slot through `f`, returning the
    /// number of slots consumed.
    pub fn drain<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(&Slot<T, B>),
    {
        let mut drained = 0;
        while let Some(slot) = self.next_readable_buffer() {
            f(slot);
            drained += 1;
        }
        drained
    }

    /// Advisory snapshot of the pool's indices and counters.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl<T, const B: usize, const N: usize> Drop for Reader<'_, T, B, N> {
    fn drop(&mut self) {
        if self.attached {
            // SAFETY: sole reader handle, going away.
            unsafe { self.pool.detach_reader() };
        }
    }
}
