//! The RX and TX pump loops.
//!
//! Each loop blocks on its ring's [`ReadySignal`](adtlink_frame::ReadySignal)
//! and exits once the signal is closed.

use std::thread;

use adtlink_frame::{scan_clip, Decoded, FrameError, Packet};
use bytes::BytesMut;
use tracing::{debug, error, trace, warn};

use crate::instance::Shared;
use crate::stats::InstanceStats;

pub(crate) fn run_rx(shared: &Shared) {
    debug!("rx pump started");
    while shared.rx.signal().wait() {
        drain_rx(shared);
    }
    debug!("rx pump stopped");
}

/// Dispatch everything currently in the RX ring.
fn drain_rx(shared: &Shared) {
    loop {
        let mut corrupt = 0u64;
        let read = shared.rx.reader().read(|first, second| {
            for clip in [first, second] {
                let scan = scan_clip(clip, |packet| dispatch(shared, packet));
                if scan.is_corrupt() {
                    corrupt += 1;
                }
            }
            first.len() + second.len()
        });

        if corrupt > 0 {
            InstanceStats::add(&shared.stats.rx_corrupt, corrupt);
            warn!(clips = corrupt, "malformed bytes in rx ring skipped");
        }
        match read {
            Ok(_) => continue,
            Err(FrameError::WouldBlock) => return,
            Err(err) => {
                error!(error = %err, "rx ring read failed");
                return;
            }
        }
    }
}

fn dispatch(shared: &Shared, decoded: &Decoded<'_>) {
    let Some(packet) = decoded.packet() else {
        trace!(kind = %decoded.kind(), "non-dispatchable packet skipped");
        return;
    };
    match packet {
        Packet::Response(body) => shared.handler.on_response(body),
        event => shared.handler.on_event(event),
    }
    InstanceStats::add(&shared.stats.rx_packets, 1);
}

pub(crate) fn run_tx(shared: &Shared) {
    debug!("tx pump started");
    let mut scratch = BytesMut::with_capacity(shared.tx.capacity());
    while shared.tx.signal().wait() {
        drain_tx(shared, &mut scratch);
    }
    debug!("tx pump stopped");
}

/// Move well-formed packets out of the TX ring and hand them to the port.
///
/// The ring lock is held only while copying into `scratch`; the transport
/// call happens after it is released so producers are not blocked on I/O.
fn drain_tx(shared: &Shared, scratch: &mut BytesMut) {
    loop {
        scratch.clear();
        let mut packets = 0u64;
        let mut corrupt = 0u64;
        let read = shared.tx.reader().read(|first, second| {
            for clip in [first, second] {
                let scan = scan_clip(clip, |_| packets += 1);
                scratch.extend_from_slice(&clip[..scan.valid]);
                if scan.is_corrupt() {
                    corrupt += 1;
                }
            }
            first.len() + second.len()
        });

        if corrupt > 0 {
            InstanceStats::add(&shared.stats.tx_corrupt, corrupt);
            error!(clips = corrupt, "malformed bytes in tx ring skipped");
        }
        match read {
            Ok(_) => {}
            Err(FrameError::WouldBlock) => return,
            Err(err) => {
                error!(error = %err, "tx ring read failed");
                return;
            }
        }
        if !scratch.is_empty() {
            transmit(shared, scratch, packets);
        }
    }
}

/// Send `bytes` on the uplink channel, retrying transient failures.
fn transmit(shared: &Shared, bytes: &[u8], packets: u64) {
    let stats = &shared.stats;
    let Some(channel) = shared.uplink() else {
        drop_tx(shared, bytes.len(), "no monitored channel");
        return;
    };

    let limit = shared.config.tx_retry_limit;
    let mut attempts = 0u32;
    let mut offset = 0usize;
    while offset < bytes.len() {
        let failure = match shared.port.send(channel, &bytes[offset..]) {
            Ok(0) => None,
            Ok(n) => {
                offset += n.min(bytes.len() - offset);
                continue;
            }
            Err(err) if err.is_transient() => Some(err),
            Err(err) => {
                warn!(channel, error = %err, "transport rejected tx batch");
                drop_tx(shared, bytes.len() - offset, "send failed");
                return;
            }
        };

        if attempts >= limit {
            let reason = match failure {
                Some(err) => format!("retries exhausted: {err}"),
                None => "transport accepted no bytes".to_string(),
            };
            drop_tx(shared, bytes.len() - offset, &reason);
            return;
        }
        attempts += 1;
        InstanceStats::add(&stats.tx_retries, 1);
        trace!(channel, attempt = attempts, "retrying tx send");
        thread::sleep(shared.config.tx_retry_delay());
    }

    InstanceStats::add(&stats.tx_packets, packets);
    InstanceStats::add(&stats.tx_bytes, bytes.len() as u64);
    InstanceStats::add(&stats.tx_transfers, 1);
    trace!(channel, packets, bytes = bytes.len(), "tx batch sent");
}

fn drop_tx(shared: &Shared, bytes: usize, reason: &str) {
    InstanceStats::add(&shared.stats.tx_dropped_bytes, bytes as u64);
    if let Some(suppressed) = shared.tx_drop_log.check() {
        warn!(bytes, suppressed, reason, "tx data dropped");
    }
}
