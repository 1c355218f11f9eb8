//! Loopback traffic simulation: a remote ADT instance feeding a local
//! multiplexer through an in-memory port pair.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use adtlink_frame::{recipient_bit, Body, Packet, PacketType};
use adtlink_mux::{ClientEvent, ClientHandle, MuxConfig, MuxStats, Multiplexer};
use adtlink_port::{ChannelId, LoopbackPort, Port};
use adtlink_pump::{AdtError, AdtInstance, PacketHandler, SendOptions, StatsSnapshot};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::exit::{adt_error, mux_error, CliError, CliResult, INTERNAL};

pub const CHANNEL: ChannelId = 1;

const SEQ_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub clients: usize,
    pub messages: usize,
    pub payload_size: usize,
    pub max_latency: Duration,
    pub restart: bool,
    pub timeout: Duration,
    pub config: MuxConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientReport {
    pub index: usize,
    pub received: u64,
    pub replied: u64,
    pub resets: u64,
    pub missed: u64,
    pub out_of_order: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub clients: Vec<ClientReport>,
    pub sent: u64,
    pub delivered: u64,
    pub missed: u64,
    pub replies_sent: u64,
    pub replies_received: u64,
    pub exits_received: u64,
    pub sender_backpressure: u64,
    pub restarted: bool,
    pub completed: bool,
    pub elapsed_ms: u64,
    pub mux: MuxStats,
    pub remote: StatsSnapshot,
}

/// Remote-side handler counting what the clients send back.
#[derive(Default)]
struct RemoteSink {
    responses: AtomicU64,
    disconnects: AtomicU64,
}

impl PacketHandler for RemoteSink {
    fn on_event(&self, packet: Packet<'_>) {
        if let Packet::Disconnect(_) = packet {
            self.disconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_response(&self, _response: Body<'_>) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }
}

struct Burst {
    sent: u64,
    backpressure: u64,
}

pub fn run(plan: &SimulationPlan) -> CliResult<SimulationReport> {
    let (local_port, remote_port) = LoopbackPort::pair(&[CHANNEL]);
    let mux = Multiplexer::new(Arc::new(local_port), plan.config.clone())
        .map_err(|err| mux_error("start multiplexer", err))?;
    mux.add_monitor(CHANNEL)
        .map_err(|err| mux_error("monitor channel", err))?;

    let sink = Arc::new(RemoteSink::default());
    let remote_port: Arc<dyn Port> = Arc::new(remote_port);
    let remote = AdtInstance::acquire(remote_port, sink.clone(), plan.config.pump.clone())
        .map_err(|err| adt_error("start remote", err))?;
    remote
        .add_monitor(CHANNEL)
        .map_err(|err| adt_error("monitor channel", err))?;

    let handles = (0..plan.clients)
        .map(|index| mux.register_client(index))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| mux_error("register client", err))?;

    let start = Instant::now();
    let deadline = start + plan.timeout;
    remote
        .announce()
        .map_err(|err| adt_error("announce remote", err))?;
    info!(
        clients = plan.clients,
        messages = plan.messages,
        payload_size = plan.payload_size,
        "simulation started"
    );

    let mux_ref = &mux;
    let (burst, clients) = thread::scope(|scope| {
        let readers: Vec<_> = handles
            .iter()
            .map(|handle| scope.spawn(move || read_client(mux_ref, handle, plan, deadline)))
            .collect();
        let burst = send_burst(&remote, plan, deadline);
        let clients = readers
            .into_iter()
            .map(|reader| {
                reader
                    .join()
                    .map_err(|_| CliError::new(INTERNAL, "client reader panicked"))
            })
            .collect::<CliResult<Vec<_>>>();
        (burst, clients)
    });
    let burst = burst.map_err(|err| adt_error("send burst", err))?;
    let clients = clients?;

    let replies_sent: u64 = clients.iter().map(|c| c.replied).sum();
    wait_until(deadline, || {
        sink.responses.load(Ordering::Relaxed) >= replies_sent
    });

    for index in 0..plan.clients {
        if let Err(err) = mux.notify_exit(index) {
            warn!(index, error = %err, "exit notification failed");
        }
    }
    wait_until(Instant::now() + Duration::from_millis(500), || {
        sink.disconnects.load(Ordering::Relaxed) >= plan.clients as u64
    });

    let mux_stats = mux.stats();
    let remote_stats = remote.stats();
    for index in 0..plan.clients {
        mux.unregister_client(index)
            .map_err(|err| mux_error("unregister client", err))?;
    }
    mux.release().map_err(|err| mux_error("release multiplexer", err))?;
    remote
        .release()
        .map_err(|err| adt_error("release remote", err))?;

    let delivered: u64 = clients.iter().map(|c| c.received).sum();
    let missed: u64 = clients.iter().map(|c| c.missed).sum();
    let replies_received = sink.responses.load(Ordering::Relaxed);
    let resets_seen = clients.iter().all(|c| c.resets > 0);
    let completed = delivered == burst.sent
        && replies_received == replies_sent
        && (!plan.restart || resets_seen);

    let report = SimulationReport {
        clients,
        sent: burst.sent,
        delivered,
        missed,
        replies_sent,
        replies_received,
        exits_received: sink.disconnects.load(Ordering::Relaxed),
        sender_backpressure: burst.backpressure,
        restarted: plan.restart,
        completed,
        elapsed_ms: start.elapsed().as_millis() as u64,
        mux: mux_stats,
        remote: remote_stats,
    };
    info!(
        sent = report.sent,
        delivered = report.delivered,
        missed = report.missed,
        completed = report.completed,
        "simulation finished"
    );
    Ok(report)
}

/// Send `messages` requests to every client, optionally announcing a
/// restart halfway through.
fn send_burst(
    remote: &AdtInstance,
    plan: &SimulationPlan,
    deadline: Instant,
) -> Result<Burst, AdtError> {
    let mut burst = Burst {
        sent: 0,
        backpressure: 0,
    };
    let mut payload = vec![0u8; plan.payload_size];
    for (i, byte) in payload.iter_mut().enumerate().skip(SEQ_LEN) {
        *byte = i as u8;
    }

    for seq in 0..plan.messages {
        if plan.restart && seq == plan.messages / 2 {
            debug!(seq, "announcing remote restart");
            queue(|| remote.announce(), || remote.flush(), deadline, &mut burst.backpressure)?;
        }
        payload[..SEQ_LEN].copy_from_slice(&(seq as u32).to_le_bytes());
        for index in 0..plan.clients {
            let Some(bit) = recipient_bit(index) else {
                continue;
            };
            let opts = SendOptions::new(bit)
                .request()
                .with_max_latency(plan.max_latency);
            if !queue(
                || remote.send(&payload, &opts),
                || remote.flush(),
                deadline,
                &mut burst.backpressure,
            )? {
                warn!(seq, index, "deadline reached while the tx ring was full");
                return Ok(burst);
            }
            burst.sent += 1;
        }
    }
    if plan.restart && plan.messages == 0 {
        queue(|| remote.announce(), || remote.flush(), deadline, &mut burst.backpressure)?;
    }
    remote.flush();
    Ok(burst)
}

/// Retry `send` while the ring is full, flushing between attempts.
/// Returns `Ok(false)` if the deadline passes first.
fn queue<S, F, E>(mut send: S, flush: F, deadline: Instant, backpressure: &mut u64) -> Result<bool, E>
where
    S: FnMut() -> Result<usize, E>,
    F: Fn(),
    E: WouldBlock,
{
    loop {
        match send() {
            Ok(_) => return Ok(true),
            Err(err) if err.would_block() => {
                *backpressure += 1;
                flush();
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                thread::sleep(Duration::from_micros(200));
            }
            Err(err) => return Err(err),
        }
    }
}

trait WouldBlock {
    fn would_block(&self) -> bool;
}

impl WouldBlock for AdtError {
    fn would_block(&self) -> bool {
        self.is_would_block()
    }
}

impl WouldBlock for adtlink_mux::MuxError {
    fn would_block(&self) -> bool {
        self.is_would_block()
    }
}

/// Drain one client until it has seen every message (and a reset, when a
/// restart is planned) or the deadline passes. Requests are answered.
fn read_client(
    mux: &Multiplexer,
    handle: &ClientHandle,
    plan: &SimulationPlan,
    deadline: Instant,
) -> ClientReport {
    let index = handle.index();
    let mut report = ClientReport {
        index,
        ..ClientReport::default()
    };
    let expected = plan.messages as u64;
    let reply = SendOptions::new(0)
        .response()
        .with_max_latency(plan.max_latency);
    let mut next_seq = 0u32;
    let mut backpressure = 0u64;

    loop {
        let done = report.received + handle.missed() >= expected
            && (!plan.restart || report.resets > 0);
        let now = Instant::now();
        if done || now >= deadline {
            break;
        }
        match handle.recv(Some(deadline - now)) {
            Ok(Some(ClientEvent::Packet(frame))) => {
                report.received += 1;
                let seq = frame
                    .payload
                    .get(..SEQ_LEN)
                    .and_then(|b| b.try_into().ok())
                    .map(u32::from_le_bytes)
                    .unwrap_or(0);
                if seq < next_seq {
                    report.out_of_order += 1;
                } else {
                    next_seq = seq.saturating_add(1);
                }
                if frame.kind == PacketType::Request {
                    match queue(
                        || mux.send_as(index, &[frame.payload.as_ref()], &reply),
                        || mux.flush(),
                        deadline,
                        &mut backpressure,
                    ) {
                        Ok(true) => report.replied += 1,
                        Ok(false) => {}
                        Err(err) => warn!(index, error = %err, "reply failed"),
                    }
                }
            }
            Ok(Some(ClientEvent::Reset)) => {
                report.resets += 1;
                debug!(index, "client saw remote reset");
            }
            Ok(None) => break,
            Err(err) => {
                warn!(index, error = %err, "client read failed");
                break;
            }
        }
    }
    report.missed = handle.missed();
    report
}

fn wait_until(deadline: Instant, mut cond: impl FnMut() -> bool) -> bool {
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}
