use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use adtlink_frame::{recipient_bit, recipients, Body, FrameError, Packet, MAX_RECIPIENTS};
use adtlink_port::{ChannelId, Port};
use adtlink_pump::{AdtInstance, PacketHandler, SendOptions, StatsSnapshot};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::client::{ClientHandle, ClientSlot, ClientStats};
use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::readiness::{Readiness, ReadinessCell};

type SlotTable = [Option<Arc<ClientSlot>>; MAX_RECIPIENTS];

/// The packet handler side of the multiplexer: slot table and remote
/// state, shared with the RX pump and with client handles.
pub(crate) struct MuxCore {
    slots: Mutex<SlotTable>,
    readiness: ReadinessCell,
    connects: AtomicU64,
    resets: AtomicU64,
    unaddressed: AtomicU64,
}

impl MuxCore {
    fn new() -> Self {
        Self {
            slots: Mutex::new(std::array::from_fn(|_| None)),
            readiness: ReadinessCell::new(Readiness::Ready),
            connects: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            unaddressed: AtomicU64::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, SlotTable> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness.get()
    }

    /// A CONNECT always means the remote is up. Any CONNECT after the
    /// first one means it restarted, so every client is told.
    fn on_connect(&self) {
        let seen = self.connects.fetch_add(1, Ordering::AcqRel);
        let previous = self.readiness.swap(Readiness::Ready);
        if seen == 0 {
            debug!(%previous, "remote connected");
            return;
        }

        self.resets.fetch_add(1, Ordering::Relaxed);
        let slots = self.slots();
        let mut woken = 0usize;
        for slot in slots.iter().flatten() {
            slot.raise_reset();
            woken += 1;
        }
        info!(%previous, clients = woken, "remote restarted, reset broadcast");
    }

    /// Copy `packet` into the ring of every registered client whose bit is
    /// set. A full ring makes only that client miss it.
    fn fan_out(&self, packet: Packet<'_>) {
        let slots = self.slots();
        let mut addressed = false;
        for index in recipients(packet.bit_flag()) {
            let Some(slot) = &slots[index] else {
                continue;
            };
            addressed = true;
            if !slot.deliver(packet) {
                trace!(index, len = packet.wire_size(), "client ring full, packet missed");
            }
        }
        if !addressed {
            self.unaddressed.fetch_add(1, Ordering::Relaxed);
            trace!(
                bit_flag = packet.bit_flag(),
                kind = %packet.kind(),
                "packet addressed no registered client"
            );
        }
    }

    fn close_all(&self) {
        let mut slots = self.slots();
        for slot in slots.iter_mut().filter_map(Option::take) {
            slot.close();
        }
    }
}

impl PacketHandler for MuxCore {
    fn on_event(&self, packet: Packet<'_>) {
        match packet {
            Packet::Connect(_) => self.on_connect(),
            event => self.fan_out(event),
        }
    }

    fn on_response(&self, response: Body<'_>) {
        self.fan_out(Packet::Response(response));
    }
}

/// Multiplexer counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MuxStats {
    pub readiness: Readiness,
    /// CONNECT packets seen since start-up.
    pub connects: u64,
    /// Reset broadcasts sent to clients.
    pub resets: u64,
    /// Inbound packets whose `bit_flag` selected no registered client.
    pub unaddressed: u64,
    pub clients: Vec<ClientStats>,
    pub adt: StatsSnapshot,
}

/// One ADT instance shared by up to eight local clients.
///
/// Inbound packets are fanned out by `bit_flag`: bit *i* selects client
/// slot *i*. Each client has its own ring, so a slow client only ever
/// loses its own packets.
///
/// Dropping the multiplexer releases the instance first, then closes every
/// client.
pub struct Multiplexer {
    instance: AdtInstance,
    core: CoreGuard,
    config: MuxConfig,
}

/// Closes every client slot and forgets remote readiness once the
/// instance in front of it has been released.
struct CoreGuard(Arc<MuxCore>);

impl std::ops::Deref for CoreGuard {
    type Target = Arc<MuxCore>;

    fn deref(&self) -> &Arc<MuxCore> {
        &self.0
    }
}

impl Drop for CoreGuard {
    fn drop(&mut self) {
        self.0.close_all();
        self.0.readiness.swap(Readiness::Unknown);
        debug!("multiplexer released");
    }
}

impl Multiplexer {
    /// Acquire an ADT instance on `port` with the multiplexer as handler.
    pub fn new(port: Arc<dyn Port>, config: MuxConfig) -> Result<Self> {
        config.validate()?;
        let core = Arc::new(MuxCore::new());
        let instance = AdtInstance::acquire(port, core.clone(), config.pump.clone())?;
        Ok(Self {
            instance,
            core: CoreGuard(core),
            config,
        })
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn add_monitor(&self, id: ChannelId) -> Result<()> {
        Ok(self.instance.add_monitor(id)?)
    }

    pub fn del_monitor(&self, id: ChannelId) -> Result<()> {
        Ok(self.instance.del_monitor(id)?)
    }

    /// Queue a packet on the shared uplink. Errors from the instance are
    /// returned as they are; there is no retry at this layer.
    pub fn send(&self, payload: &[u8], opts: &SendOptions) -> Result<usize> {
        Ok(self.instance.send(payload, opts)?)
    }

    /// Gather `parts` in client `index`'s scratch buffer and send them as
    /// one packet with `bit_flag` set to that client's bit.
    pub fn send_as(&self, index: usize, parts: &[&[u8]], opts: &SendOptions) -> Result<usize> {
        let bit = recipient_bit(index).ok_or(MuxError::InvalidClient(index))?;
        let slot = self.slot(index)?.ok_or(MuxError::NotRegistered(index))?;

        let total: usize = parts.iter().map(|p| p.len()).sum();
        let max = self.config.scratch_size();
        if total > max {
            return Err(FrameError::PayloadTooLarge { size: total, max }.into());
        }

        let mut scratch = slot.scratch();
        scratch.clear();
        for part in parts {
            scratch.extend_from_slice(part);
        }
        let opts = SendOptions {
            bit_flag: bit,
            ..*opts
        };
        self.send(&scratch, &opts)
    }

    /// Claim slot `index` and return its read handle.
    pub fn register_client(&self, index: usize) -> Result<ClientHandle> {
        if index >= MAX_RECIPIENTS {
            return Err(MuxError::InvalidClient(index));
        }
        let mut slots = self.core.slots();
        if slots[index].is_some() {
            return Err(MuxError::AlreadyRegistered(index));
        }
        let slot = Arc::new(ClientSlot::new(
            index,
            self.config.client_buffer_size(),
            self.config.scratch_size(),
        )?);
        slots[index] = Some(Arc::clone(&slot));
        drop(slots);

        info!(index, "client registered");
        Ok(ClientHandle {
            slot,
            core: Arc::clone(&self.core.0),
        })
    }

    /// Free slot `index`. Returns whether a client was registered there.
    ///
    /// Outstanding handles for the slot start failing with
    /// [`MuxError::Closed`].
    pub fn unregister_client(&self, index: usize) -> Result<bool> {
        if index >= MAX_RECIPIENTS {
            return Err(MuxError::InvalidClient(index));
        }
        let taken = self.core.slots()[index].take();
        match taken {
            Some(slot) => {
                slot.close();
                info!(index, "client unregistered");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Handle for an already registered client.
    pub fn client(&self, index: usize) -> Option<ClientHandle> {
        let slot = self.slot(index).ok().flatten()?;
        Some(ClientHandle {
            slot,
            core: Arc::clone(&self.core.0),
        })
    }

    fn slot(&self, index: usize) -> Result<Option<Arc<ClientSlot>>> {
        if index >= MAX_RECIPIENTS {
            return Err(MuxError::InvalidClient(index));
        }
        Ok(self.core.slots()[index].clone())
    }

    /// Tell the remote side that client `index` is going away: one empty
    /// DISCONNECT addressed only to that client's bit, flushed at once.
    pub fn notify_exit(&self, index: usize) -> Result<usize> {
        let bit = recipient_bit(index).ok_or(MuxError::InvalidClient(index))?;
        let opts = SendOptions::new(bit)
            .disconnect()
            .with_max_latency(Duration::ZERO);
        let queued = self.send(&[], &opts)?;
        debug!(index, "client exit announced");
        Ok(queued)
    }

    /// Entry point for the external reset notifier: the remote is going
    /// down. Readiness stays `NotReady` until the next CONNECT.
    pub fn notify_remote_reset(&self) {
        let previous = self.core.readiness.swap(Readiness::NotReady);
        warn!(%previous, "remote reset notified");
    }

    pub fn readiness(&self) -> Readiness {
        self.core.readiness()
    }

    /// Queue a CONNECT on the uplink.
    pub fn announce(&self) -> Result<usize> {
        Ok(self.instance.announce()?)
    }

    pub fn flush(&self) {
        self.instance.flush();
    }

    pub fn stats(&self) -> MuxStats {
        let clients = self
            .core
            .slots()
            .iter()
            .flatten()
            .map(|slot| slot.stats())
            .collect();
        MuxStats {
            readiness: self.core.readiness(),
            connects: self.core.connects.load(Ordering::Relaxed),
            resets: self.core.resets.load(Ordering::Relaxed),
            unaddressed: self.core.unaddressed.load(Ordering::Relaxed),
            clients,
            adt: self.instance.stats(),
        }
    }

    /// Release the instance, then close every client.
    pub fn release(self) -> Result<()> {
        let Self { instance, core, .. } = self;
        let result = instance.release();
        drop(core);
        Ok(result?)
    }
}
