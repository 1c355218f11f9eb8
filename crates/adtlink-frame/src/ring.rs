//! Fixed-capacity byte ring with split ("clip") writes and reads.
//!
//! The backing store holds `capacity + 1` bytes so that `begin == end`
//! always means empty. A write or read is offered the free or filled region
//! as at most two contiguous clips: the first runs from the cursor up to the
//! physical end (or the other cursor), the second is the wrapped remainder.
//! The callback decides how many bytes it actually used.
//!
//! Producers and consumers take separate locks, so a writer never contends
//! with a reader, only with other writers.

use std::cell::UnsafeCell;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::error;

use crate::error::{FrameError, Result};

/// Hard upper bound on ring capacity.
pub const MAX_CAPACITY: usize = 64 * 1024 - 1;

/// Byte ring shared between one producer side and one consumer side.
pub struct RingBuffer {
    storage: Box<[UnsafeCell<u8>]>,
    capacity: usize,
    begin: AtomicUsize,
    end: AtomicUsize,
    read_lock: Mutex<()>,
    write_lock: Mutex<()>,
    ready: ReadySignal,
}

// SAFETY: bytes in `storage` are only touched through `RingWriter` and
// `RingReader`. A writer holds `write_lock` and only touches the free region
// `[end, begin - 1)`; a reader holds `read_lock` and only touches the filled
// region `[begin, end)`. The regions are disjoint, and cursor hand-off uses
// release/acquire ordering so bytes are published before the cursor moves.
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Allocate a ring holding up to `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(FrameError::InvalidCapacity {
                capacity,
                max: MAX_CAPACITY,
            });
        }
        let slots = capacity + 1;
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(slots)
            .map_err(|_| FrameError::OutOfMemory(slots))?;
        storage.resize_with(slots, || UnsafeCell::new(0));

        Ok(Self {
            storage: storage.into_boxed_slice(),
            capacity,
            begin: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
            ready: ReadySignal::new(),
        })
    }

    /// Maximum number of bytes the ring holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently queued. Unlocked; may be stale under concurrency.
    ///
    /// The two cursors are loaded separately, so a concurrent rewind of an
    /// empty ring can briefly read as non-empty. Use [`usage_with_lock`]
    /// when the answer must match what a reader would see.
    ///
    /// [`usage_with_lock`]: RingBuffer::usage_with_lock
    pub fn usage(&self) -> usize {
        let begin = self.begin.load(Ordering::Acquire);
        let end = self.end.load(Ordering::Acquire);
        (end + self.slots() - begin) % self.slots()
    }

    /// Bytes that can still be written. Unlocked.
    pub fn left(&self) -> usize {
        self.capacity - self.usage()
    }

    pub fn is_empty(&self) -> bool {
        self.usage() == 0
    }

    pub fn is_full(&self) -> bool {
        self.usage() == self.capacity
    }

    /// Consistent usage snapshot taken with both locks held.
    pub fn usage_with_lock(&self) -> usize {
        let _write = lock(&self.write_lock);
        let _read = lock(&self.read_lock);
        self.usage()
    }

    /// Consistent free-space snapshot taken with both locks held.
    pub fn left_with_lock(&self) -> usize {
        self.capacity - self.usage_with_lock()
    }

    /// Take the producer lock.
    pub fn writer(&self) -> RingWriter<'_> {
        RingWriter {
            ring: self,
            _guard: lock(&self.write_lock),
        }
    }

    /// Take the consumer lock.
    pub fn reader(&self) -> RingReader<'_> {
        RingReader {
            ring: self,
            _guard: lock(&self.read_lock),
        }
    }

    /// Run one clip write under the producer lock.
    pub fn write_with_lock<F>(&self, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8], &mut [u8]) -> usize,
    {
        self.writer().write(fill)
    }

    /// Run one clip read under the consumer lock.
    pub fn read_with_lock<F>(&self, drain: F) -> Result<usize>
    where
        F: FnOnce(&[u8], &[u8]) -> usize,
    {
        self.reader().read(drain)
    }

    /// Readiness signal consumers block on.
    pub fn signal(&self) -> &ReadySignal {
        &self.ready
    }

    fn slots(&self) -> usize {
        self.capacity + 1
    }

    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.storage.as_ptr())
    }

    /// # Safety
    ///
    /// `range` must lie within the storage and must not overlap a region any
    /// other thread may access for the lifetime of the returned slice.
    #[allow(clippy::mut_from_ref)]
    unsafe fn span_mut(&self, range: Range<usize>) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.base().add(range.start), range.len())
    }

    /// # Safety
    ///
    /// `range` must lie within the storage and must not be written by any
    /// other thread for the lifetime of the returned slice.
    unsafe fn span(&self, range: Range<usize>) -> &[u8] {
        std::slice::from_raw_parts(self.base().add(range.start), range.len())
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("begin", &self.begin.load(Ordering::Relaxed))
            .field("end", &self.end.load(Ordering::Relaxed))
            .finish()
    }
}

/// Producer-side handle. Holds the write lock until dropped.
pub struct RingWriter<'a> {
    ring: &'a RingBuffer,
    _guard: MutexGuard<'a, ()>,
}

impl RingWriter<'_> {
    /// Offer the free region as two clips.
    ///
    /// `fill` returns how many bytes it wrote, counting from the start of the
    /// first clip and running into the second. Returns the bytes committed.
    /// Fails with [`FrameError::WouldBlock`] when the ring is already full.
    pub fn write<F>(&mut self, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8], &mut [u8]) -> usize,
    {
        let ring = self.ring;
        let slots = ring.slots();
        let begin = ring.begin.load(Ordering::Acquire);
        let end = ring.end.load(Ordering::Relaxed);
        if (end + slots - begin) % slots == ring.capacity {
            return Err(FrameError::WouldBlock);
        }

        let (first, second) = if end >= begin {
            if begin == 0 {
                (end..slots - 1, 0..0)
            } else {
                (end..slots, 0..begin - 1)
            }
        } else {
            (end..begin - 1, 0..0)
        };

        // SAFETY: both ranges are inside the free region, which the reader
        // never touches, and we hold the write lock.
        let (a, b) = unsafe { (ring.span_mut(first), ring.span_mut(second)) };
        let offered = a.len() + b.len();
        let consumed = fill(a, b);
        if consumed > offered {
            error!(consumed, offered, "ring write callback overran its clips");
            return Err(FrameError::Corruption { consumed, offered });
        }

        ring.end.store((end + consumed) % slots, Ordering::Release);
        Ok(consumed)
    }

    /// Move both cursors back to the start when the ring is empty and no
    /// reader is active, so the first clip spans the whole capacity.
    ///
    /// Both locks are held while the cursors move, so only the unlocked
    /// accessors can observe the intermediate state.
    pub fn rewind_if_empty(&mut self) -> bool {
        let ring = self.ring;
        let Ok(_read) = ring.read_lock.try_lock() else {
            return false;
        };
        let begin = ring.begin.load(Ordering::Acquire);
        let end = ring.end.load(Ordering::Relaxed);
        if begin != end || begin == 0 {
            return false;
        }
        ring.begin.store(0, Ordering::Release);
        ring.end.store(0, Ordering::Release);
        true
    }

    /// Free space as seen by the producer.
    pub fn left(&self) -> usize {
        self.ring.left()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }
}

/// Consumer-side handle. Holds the read lock until dropped.
pub struct RingReader<'a> {
    ring: &'a RingBuffer,
    _guard: MutexGuard<'a, ()>,
}

impl RingReader<'_> {
    /// Offer the filled region as two clips.
    ///
    /// `drain` returns how many bytes it consumed. Fails with
    /// [`FrameError::WouldBlock`] when the ring is empty.
    pub fn read<F>(&mut self, drain: F) -> Result<usize>
    where
        F: FnOnce(&[u8], &[u8]) -> usize,
    {
        let ring = self.ring;
        let slots = ring.slots();
        let end = ring.end.load(Ordering::Acquire);
        let begin = ring.begin.load(Ordering::Relaxed);
        if begin == end {
            return Err(FrameError::WouldBlock);
        }

        let (first, second) = if end > begin {
            (begin..end, 0..0)
        } else {
            (begin..slots, 0..end)
        };

        // SAFETY: both ranges are inside the filled region, which the writer
        // never touches, and we hold the read lock.
        let (a, b) = unsafe { (ring.span(first), ring.span(second)) };
        let offered = a.len() + b.len();
        let consumed = drain(a, b);
        if consumed > offered {
            error!(consumed, offered, "ring read callback overran its clips");
            return Err(FrameError::Corruption { consumed, offered });
        }

        ring.begin.store((begin + consumed) % slots, Ordering::Release);
        Ok(consumed)
    }

    /// Bytes queued as seen by the consumer.
    pub fn usage(&self) -> usize {
        self.ring.usage()
    }
}

/// Outcome of waiting on a [`ReadySignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Ready,
    TimedOut,
    Closed,
}

/// Level-triggered wakeup flag.
///
/// `notify` latches readiness until the next successful wait consumes it,
/// so a notification sent before the waiter blocks is never lost.
#[derive(Debug, Default)]
pub struct ReadySignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct SignalState {
    ready: bool,
    closed: bool,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch readiness and wake all waiters.
    pub fn notify(&self) {
        let mut state = lock(&self.state);
        state.ready = true;
        self.cond.notify_all();
    }

    /// Wake all waiters for good. Later waits return [`Wait::Closed`].
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Block until notified or closed. Returns `false` once closed.
    pub fn wait(&self) -> bool {
        let mut state = lock(&self.state);
        loop {
            if state.closed {
                return false;
            }
            if state.ready {
                state.ready = false;
                return true;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until notified, closed, or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Wait {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        loop {
            if state.closed {
                return Wait::Closed;
            }
            if state.ready {
                state.ready = false;
                return Wait::Ready;
            }
            let now = Instant::now();
            if now >= deadline {
                return Wait::TimedOut;
            }
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
