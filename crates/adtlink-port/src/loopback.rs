use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::error::{PortError, Result};
use crate::traits::{ChannelId, InboundHandler, Port, DEFAULT_ALIGNMENT};

/// In-memory transport connecting two ends.
///
/// Bytes sent on one end are delivered synchronously to the inbound handler
/// the other end registered for the same channel id. Delivery for a channel
/// is serialised, so at most one inbound handler call per id runs at a time.
/// Sends towards a channel the peer has not opened are accepted and dropped.
pub struct LoopbackPort {
    local: Arc<Endpoint>,
    remote: Arc<Endpoint>,
    known: Arc<HashSet<ChannelId>>,
    alignment: usize,
}

struct Endpoint {
    name: &'static str,
    channels: Mutex<HashMap<ChannelId, Arc<Registration>>>,
    faults: Faults,
    send_calls: AtomicU64,
    bytes_sent: AtomicU64,
    shut_down: AtomicBool,
}

struct Registration {
    handler: InboundHandler,
    delivery: Mutex<()>,
}

#[derive(Default)]
struct Faults {
    pending: AtomicUsize,
    transient: AtomicBool,
}

impl Endpoint {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            channels: Mutex::new(HashMap::new()),
            faults: Faults::default(),
            send_calls: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<ChannelId, Arc<Registration>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LoopbackPort {
    /// Create two connected ends that both know `channels`.
    ///
    /// Returns `(local, remote)`.
    pub fn pair(channels: &[ChannelId]) -> (Self, Self) {
        Self::pair_with_alignment(channels, DEFAULT_ALIGNMENT)
    }

    /// Create two connected ends with an explicit payload alignment.
    pub fn pair_with_alignment(channels: &[ChannelId], alignment: usize) -> (Self, Self) {
        let known = Arc::new(channels.iter().copied().collect::<HashSet<_>>());
        let a = Arc::new(Endpoint::new("local"));
        let b = Arc::new(Endpoint::new("remote"));

        let local = Self {
            local: Arc::clone(&a),
            remote: Arc::clone(&b),
            known: Arc::clone(&known),
            alignment,
        };
        let remote = Self {
            local: b,
            remote: a,
            known,
            alignment,
        };
        (local, remote)
    }

    /// Make the next `count` sends on this end fail.
    ///
    /// Transient failures surface as [`PortError::Busy`], permanent ones as
    /// a broken-pipe I/O error.
    pub fn fail_next_sends(&self, count: usize, transient: bool) {
        self.local.faults.transient.store(transient, Ordering::SeqCst);
        self.local.faults.pending.store(count, Ordering::SeqCst);
    }

    /// Number of `send` calls made on this end, including failed ones.
    pub fn send_calls(&self) -> u64 {
        self.local.send_calls.load(Ordering::SeqCst)
    }

    /// Total bytes accepted by `send` on this end.
    pub fn bytes_sent(&self) -> u64 {
        self.local.bytes_sent.load(Ordering::SeqCst)
    }

    /// Whether this end currently has `id` open.
    pub fn is_open(&self, id: ChannelId) -> bool {
        self.local.channels().contains_key(&id)
    }

    /// Shut this end down. Later sends fail with [`PortError::Shutdown`].
    pub fn shutdown(&self) {
        self.local.shut_down.store(true, Ordering::SeqCst);
        debug!(end = self.local.name, "loopback port shut down");
    }

    fn take_fault(&self, id: ChannelId) -> Option<PortError> {
        let faults = &self.local.faults;
        let taken = faults
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !taken {
            return None;
        }
        if faults.transient.load(Ordering::SeqCst) {
            Some(PortError::Busy(id))
        } else {
            Some(PortError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )))
        }
    }
}

impl Port for LoopbackPort {
    fn lookup(&self, id: ChannelId) -> Result<()> {
        if self.known.contains(&id) {
            Ok(())
        } else {
            Err(PortError::NotFound(id))
        }
    }

    fn open(&self, id: ChannelId, inbound: InboundHandler) -> Result<()> {
        self.lookup(id)?;
        let mut channels = self.local.channels();
        if channels.contains_key(&id) {
            return Err(PortError::AlreadyOpen(id));
        }
        channels.insert(
            id,
            Arc::new(Registration {
                handler: inbound,
                delivery: Mutex::new(()),
            }),
        );
        debug!(end = self.local.name, channel = id, "loopback channel opened");
        Ok(())
    }

    fn close(&self, id: ChannelId) -> Result<InboundHandler> {
        let registration = self
            .local
            .channels()
            .remove(&id)
            .ok_or(PortError::NotOpen(id))?;
        // Wait out an in-flight delivery before handing the handler back.
        drop(
            registration
                .delivery
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        debug!(end = self.local.name, channel = id, "loopback channel closed");
        Ok(Arc::clone(&registration.handler))
    }

    fn send(&self, id: ChannelId, bytes: &[u8]) -> Result<usize> {
        self.local.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.local.shut_down.load(Ordering::SeqCst) {
            return Err(PortError::Shutdown);
        }
        if !self.local.channels().contains_key(&id) {
            return Err(PortError::NotOpen(id));
        }
        if let Some(err) = self.take_fault(id) {
            return Err(err);
        }

        let peer = self.remote.channels().get(&id).cloned();
        self.local
            .bytes_sent
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);

        match peer {
            Some(registration) => {
                let _serial = registration
                    .delivery
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                trace!(
                    from = self.local.name,
                    channel = id,
                    bytes = bytes.len(),
                    "loopback delivery"
                );
                (registration.handler)(bytes);
            }
            None => {
                debug!(
                    from = self.local.name,
                    channel = id,
                    bytes = bytes.len(),
                    "peer channel not open, dropping"
                );
            }
        }
        Ok(bytes.len())
    }

    fn alignment(&self) -> usize {
        self.alignment
    }
}

impl std::fmt::Debug for LoopbackPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackPort")
            .field("end", &self.local.name)
            .field("alignment", &self.alignment)
            .finish()
    }
}
