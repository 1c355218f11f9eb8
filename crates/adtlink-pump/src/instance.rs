use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use adtlink_frame::{scan_aligned, write_packet, write_raw, PacketType, RingBuffer};
use adtlink_port::{ChannelId, InboundHandler, Port};
use tracing::{debug, info, warn};

use crate::config::PumpConfig;
use crate::debounce::Debouncer;
use crate::error::{AdtError, Result};
use crate::handler::PacketHandler;
use crate::options::SendOptions;
use crate::pump;
use crate::stats::{InstanceStats, LogThrottle, StatsSnapshot};

/// State shared between the instance, its pump threads, and the inbound
/// handlers registered with the port.
pub(crate) struct Shared {
    pub port: Arc<dyn Port>,
    pub rx: RingBuffer,
    pub tx: RingBuffer,
    pub handler: Arc<dyn PacketHandler>,
    pub config: PumpConfig,
    pub stats: InstanceStats,
    pub missed_log: LogThrottle,
    pub tx_drop_log: LogThrottle,
    channels: Mutex<Vec<ChannelId>>,
}

impl Shared {
    fn channels(&self) -> MutexGuard<'_, Vec<ChannelId>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Channel that carries outbound traffic: the oldest monitored one.
    pub fn uplink(&self) -> Option<ChannelId> {
        self.channels().first().copied()
    }

    /// Copy an inbound batch into the RX ring in one operation.
    ///
    /// Only the well-formed, aligned packet prefix is kept. When the ring
    /// has no room the whole batch is dropped and counted as missed.
    pub fn ingest(&self, batch: &[u8]) {
        let scan = scan_aligned(batch, self.port.alignment(), |_| {});
        if scan.is_corrupt() {
            InstanceStats::add(&self.stats.rx_corrupt, 1);
            debug!(
                len = batch.len(),
                valid = scan.valid,
                "inbound batch truncated at malformed packet"
            );
        }
        let valid = &batch[..scan.valid];
        if valid.is_empty() {
            return;
        }

        match write_raw(&mut self.rx.writer(), valid) {
            Ok(_) => {
                InstanceStats::add(&self.stats.rx_batches, 1);
                self.rx.signal().notify();
            }
            Err(err) => {
                InstanceStats::add(&self.stats.rx_missed_batches, 1);
                InstanceStats::add(&self.stats.rx_missed_bytes, valid.len() as u64);
                if let Some(suppressed) = self.missed_log.check() {
                    warn!(
                        len = valid.len(),
                        suppressed,
                        error = %err,
                        "rx ring full, inbound batch missed"
                    );
                }
            }
        }
    }
}

/// One packet pump bound to a transport.
///
/// Owns an RX and a TX ring, an RX pump thread dispatching inbound packets
/// to a [`PacketHandler`], a TX pump thread feeding the port, and a timer
/// that coalesces outbound flushes. Dropping the instance releases it.
pub struct AdtInstance {
    shared: Arc<Shared>,
    timer: Option<Debouncer>,
    rx_thread: Option<JoinHandle<()>>,
    tx_thread: Option<JoinHandle<()>>,
}

impl AdtInstance {
    /// Allocate both rings and start the pump threads.
    ///
    /// Anything started before a failure is torn down again before the
    /// error is returned.
    pub fn acquire(
        port: Arc<dyn Port>,
        handler: Arc<dyn PacketHandler>,
        config: PumpConfig,
    ) -> Result<Self> {
        config.validate()?;
        config.check_alignment(port.alignment())?;
        let rx = RingBuffer::new(config.rx_buffer_size)?;
        let tx = RingBuffer::new(config.tx_buffer_size)?;
        let interval = config.missed_log_interval();
        let shared = Arc::new(Shared {
            port,
            rx,
            tx,
            handler,
            config,
            stats: InstanceStats::default(),
            missed_log: LogThrottle::new(interval),
            tx_drop_log: LogThrottle::new(interval),
            channels: Mutex::new(Vec::new()),
        });

        let mut instance = Self {
            shared: Arc::clone(&shared),
            timer: None,
            rx_thread: None,
            tx_thread: None,
        };

        let flush = Arc::clone(&shared);
        instance.timer = Some(
            Debouncer::spawn("adt-tx-timer", move || flush.tx.signal().notify())
                .map_err(|source| AdtError::Spawn {
                    name: "adt-tx-timer",
                    source,
                })?,
        );
        instance.rx_thread = Some(spawn_pump("adt-rx", &shared, pump::run_rx)?);
        instance.tx_thread = Some(spawn_pump("adt-tx", &shared, pump::run_tx)?);

        info!(
            rx_buffer_size = shared.config.rx_buffer_size,
            tx_buffer_size = shared.config.tx_buffer_size,
            alignment = shared.port.alignment(),
            "adt instance acquired"
        );
        Ok(instance)
    }

    /// Start listening on `id` and make it eligible to carry TX traffic.
    pub fn add_monitor(&self, id: ChannelId) -> Result<()> {
        if self.shared.channels().contains(&id) {
            return Err(AdtError::AlreadyMonitored(id));
        }
        self.shared.port.lookup(id)?;

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let inbound: InboundHandler = Arc::new(move |batch: &[u8]| {
            if let Some(shared) = weak.upgrade() {
                shared.ingest(batch);
            }
        });
        self.shared.port.open(id, inbound)?;

        let mut channels = self.shared.channels();
        if channels.contains(&id) {
            drop(channels);
            let _ = self.shared.port.close(id);
            return Err(AdtError::AlreadyMonitored(id));
        }
        channels.push(id);
        debug!(channel = id, "channel monitored");
        Ok(())
    }

    /// Stop listening on `id`.
    pub fn del_monitor(&self, id: ChannelId) -> Result<()> {
        {
            let mut channels = self.shared.channels();
            let pos = channels
                .iter()
                .position(|c| *c == id)
                .ok_or(AdtError::NotMonitored(id))?;
            channels.remove(pos);
        }
        self.shared.port.close(id)?;
        debug!(channel = id, "channel unmonitored");
        Ok(())
    }

    /// Monitored channels, oldest first.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.shared.channels().clone()
    }

    /// Queue one packet for transmission. Returns the encoded length.
    ///
    /// Fails with a would-block error when the TX ring has no room; the
    /// caller decides whether to retry.
    pub fn send(&self, payload: &[u8], opts: &SendOptions) -> Result<usize> {
        let kind = opts.packet_type()?;
        self.validate_payload(kind, payload)?;
        self.enqueue(kind, opts.bit_flag, payload, opts.max_latency)
    }

    /// Queue a CONNECT packet and flush it immediately.
    pub fn announce(&self) -> Result<usize> {
        self.enqueue(PacketType::Connect, 0, &[], std::time::Duration::ZERO)
    }

    /// Wake the TX pump now, regardless of pending latency bounds.
    pub fn flush(&self) {
        self.shared.tx.signal().notify();
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn config(&self) -> &PumpConfig {
        &self.shared.config
    }

    /// Bytes waiting in the TX ring.
    pub fn tx_usage(&self) -> usize {
        self.shared.tx.usage()
    }

    /// Feed an inbound batch as if the port had delivered it.
    pub fn ingest(&self, batch: &[u8]) {
        self.shared.ingest(batch);
    }

    /// Close every channel, stop the timer and both pumps, and free the
    /// rings. Queued TX data that has not been flushed is discarded.
    pub fn release(mut self) -> Result<()> {
        self.teardown()
    }

    fn validate_payload(&self, kind: PacketType, payload: &[u8]) -> Result<()> {
        if payload.is_empty() && !kind.allows_empty_payload() {
            return Err(AdtError::InvalidArgument(format!(
                "{kind} packet needs a payload"
            )));
        }
        let alignment = self.shared.port.alignment();
        if payload.len() % alignment != 0 {
            return Err(AdtError::InvalidArgument(format!(
                "payload length {} is not a multiple of {alignment}",
                payload.len()
            )));
        }
        Ok(())
    }

    fn enqueue(
        &self,
        kind: PacketType,
        bit_flag: u8,
        payload: &[u8],
        max_latency: std::time::Duration,
    ) -> Result<usize> {
        let placement = write_packet(&mut self.shared.tx.writer(), kind, bit_flag, &[payload])?;
        if max_latency.is_zero() {
            self.shared.tx.signal().notify();
        } else if let Some(timer) = &self.timer {
            timer.schedule(max_latency);
        }
        Ok(placement.len)
    }

    fn teardown(&mut self) -> Result<()> {
        let mut first_err = None;
        let channels = std::mem::take(&mut *self.shared.channels());
        for id in channels {
            if let Err(err) = self.shared.port.close(id) {
                warn!(channel = id, error = %err, "failed to close channel on release");
                first_err.get_or_insert(AdtError::Port(err));
            }
        }

        if let Some(mut timer) = self.timer.take() {
            timer.shutdown();
        }
        self.shared.rx.signal().close();
        self.shared.tx.signal().close();
        for handle in [self.rx_thread.take(), self.tx_thread.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                warn!("pump thread panicked");
            }
        }
        debug!("adt instance released");
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for AdtInstance {
    fn drop(&mut self) {
        if self.rx_thread.is_some() || self.tx_thread.is_some() || self.timer.is_some() {
            let _ = self.teardown();
        }
    }
}

fn spawn_pump(
    name: &'static str,
    shared: &Arc<Shared>,
    body: fn(&Shared),
) -> Result<JoinHandle<()>> {
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(&shared))
        .map_err(|source| AdtError::Spawn { name, source })
}
