use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use adtlink_frame::{next_frame, write_packet, Frame, Packet, RingBuffer, Wait};
use bytes::BytesMut;
use serde::Serialize;

use crate::error::{MuxError, Result};
use crate::mux::MuxCore;
use crate::readiness::Readiness;

/// One registered client: a private receive ring, a scratch send buffer,
/// and a sticky reset flag. The ring's signal doubles as the wait queue.
pub(crate) struct ClientSlot {
    pub index: usize,
    pub ring: RingBuffer,
    pub scratch: Mutex<BytesMut>,
    reset: AtomicBool,
    delivered: AtomicU64,
    missed: AtomicU64,
}

impl ClientSlot {
    pub fn new(index: usize, ring_size: usize, scratch_size: usize) -> Result<Self> {
        Ok(Self {
            index,
            ring: RingBuffer::new(ring_size)?,
            scratch: Mutex::new(BytesMut::with_capacity(scratch_size)),
            reset: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            missed: AtomicU64::new(0),
        })
    }

    pub fn scratch(&self) -> MutexGuard<'_, BytesMut> {
        self.scratch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy one packet into this client's ring. Returns `false` if it was
    /// missed for lack of room.
    pub fn deliver(&self, packet: Packet<'_>) -> bool {
        let mut writer = self.ring.writer();
        match write_packet(&mut writer, packet.kind(), packet.bit_flag(), &[packet.payload()]) {
            Ok(_) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                self.ring.signal().notify();
                true
            }
            Err(_) => {
                self.missed.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Set the sticky reset flag and wake the reader once.
    pub fn raise_reset(&self) {
        self.reset.store(true, Ordering::Release);
        self.ring.signal().notify();
    }

    pub fn close(&self) {
        self.ring.signal().close();
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            index: self.index,
            delivered: self.delivered.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            buffered: self.ring.usage_with_lock(),
            reset_pending: self.reset.load(Ordering::Acquire),
        }
    }
}

/// Counters for one client slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub index: usize,
    pub delivered: u64,
    pub missed: u64,
    pub buffered: usize,
    pub reset_pending: bool,
}

/// What a client read yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Packet(Frame),
    /// The remote side restarted. Packets buffered before the restart are
    /// still readable afterwards.
    Reset,
}

/// Readiness flags reported by [`ClientHandle::poll`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollFlags {
    pub readable: bool,
    pub reset: bool,
}

/// The read side of a registered client.
///
/// Handles stay valid after the client is unregistered or the multiplexer
/// is released; reads then fail with [`MuxError::Closed`].
#[derive(Clone)]
pub struct ClientHandle {
    pub(crate) slot: Arc<ClientSlot>,
    pub(crate) core: Arc<MuxCore>,
}

impl ClientHandle {
    pub fn index(&self) -> usize {
        self.slot.index
    }

    /// Take the next event without blocking.
    ///
    /// A pending reset is reported before any buffered packet.
    pub fn try_recv(&self) -> Result<Option<ClientEvent>> {
        if self.slot.ring.signal().is_closed() {
            return Err(MuxError::Closed(self.slot.index));
        }
        if self.take_reset() {
            return Ok(Some(ClientEvent::Reset));
        }
        Ok(next_frame(&mut self.slot.ring.reader())?.map(ClientEvent::Packet))
    }

    /// Block until an event arrives. `None` waits forever; on timeout
    /// `Ok(None)` is returned.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<Option<ClientEvent>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(event) = self.try_recv()? {
                return Ok(Some(event));
            }
            let signal = self.slot.ring.signal();
            match deadline {
                None => {
                    if !signal.wait() {
                        return Err(MuxError::Closed(self.slot.index));
                    }
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    match signal.wait_timeout(deadline - now) {
                        Wait::Ready => {}
                        Wait::TimedOut => return Ok(None),
                        Wait::Closed => return Err(MuxError::Closed(self.slot.index)),
                    }
                }
            }
        }
    }

    /// Current flags, without consuming anything.
    pub fn poll(&self) -> PollFlags {
        PollFlags {
            readable: self.slot.ring.usage_with_lock() > 0,
            reset: self.slot.reset.load(Ordering::Acquire),
        }
    }

    /// Clear and return the sticky reset flag.
    pub fn take_reset(&self) -> bool {
        self.slot.reset.swap(false, Ordering::AcqRel)
    }

    /// Packets this client missed because its ring was full.
    pub fn missed(&self) -> u64 {
        self.slot.missed.load(Ordering::Relaxed)
    }

    /// Bytes waiting in this client's ring.
    pub fn usage(&self) -> usize {
        self.slot.ring.usage_with_lock()
    }

    pub fn stats(&self) -> ClientStats {
        self.slot.stats()
    }

    pub fn remote_readiness(&self) -> Readiness {
        self.core.readiness()
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("index", &self.slot.index)
            .field("usage", &self.slot.ring.usage())
            .finish()
    }
}
