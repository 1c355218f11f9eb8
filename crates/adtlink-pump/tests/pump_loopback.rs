use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use adtlink_frame::{encode_frame, Body, Packet, PacketType};
use adtlink_port::{ChannelId, LoopbackPort, Port, PortError};
use adtlink_pump::{AdtError, AdtInstance, PacketHandler, PumpConfig, SendOptions};
use bytes::BytesMut;

const CHANNEL: ChannelId = 7;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(PacketType, u8, Vec<u8>)>>,
    responses: Mutex<Vec<(u8, Vec<u8>)>>,
}

impl PacketHandler for Recorder {
    fn on_event(&self, packet: Packet<'_>) {
        self.events.lock().unwrap().push((
            packet.kind(),
            packet.bit_flag(),
            packet.payload().to_vec(),
        ));
    }

    fn on_response(&self, response: Body<'_>) {
        self.responses
            .lock()
            .unwrap()
            .push((response.bit_flag, response.payload.to_vec()));
    }
}

impl Recorder {
    fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

struct Pair {
    local: AdtInstance,
    local_port: Arc<LoopbackPort>,
    remote: AdtInstance,
    remote_seen: Arc<Recorder>,
}

fn pair(config: PumpConfig) -> Pair {
    let (a, b) = LoopbackPort::pair(&[CHANNEL]);
    let local_port = Arc::new(a);
    let remote_port: Arc<dyn Port> = Arc::new(b);
    let remote_seen = Arc::new(Recorder::default());

    let local = AdtInstance::acquire(
        local_port.clone() as Arc<dyn Port>,
        Arc::new(Recorder::default()),
        config.clone(),
    )
    .expect("local instance should start");
    local.add_monitor(CHANNEL).expect("monitor should register");

    let remote = AdtInstance::acquire(remote_port, remote_seen.clone(), config)
        .expect("remote instance should start");
    remote.add_monitor(CHANNEL).expect("monitor should register");

    Pair {
        local,
        local_port,
        remote,
        remote_seen,
    }
}

#[test]
fn immediate_send_reaches_remote_handler() {
    let p = pair(PumpConfig::default());
    let opts = SendOptions::new(0b0000_0010);
    assert_eq!(p.local.send(b"ping", &opts).unwrap(), 8);

    assert!(eventually(|| p.remote_seen.event_count() == 1));
    let events = p.remote_seen.events.lock().unwrap();
    assert_eq!(events[0], (PacketType::Normal, 0b10, b"ping".to_vec()));
}

#[test]
fn responses_go_to_the_response_callback() {
    let p = pair(PumpConfig::default());
    p.local
        .send(b"done", &SendOptions::new(1).response())
        .unwrap();
    p.local
        .send(b"ask?", &SendOptions::new(1).request())
        .unwrap();

    assert!(eventually(|| p.remote_seen.event_count() == 1
        && p.remote_seen.responses.lock().unwrap().len() == 1));
    assert_eq!(p.remote_seen.events.lock().unwrap()[0].0, PacketType::Request);
    assert_eq!(
        p.remote_seen.responses.lock().unwrap()[0],
        (1, b"done".to_vec())
    );
}

#[test]
fn latency_bound_coalesces_a_burst_into_one_transfer() {
    let p = pair(PumpConfig::default());
    let opts = SendOptions::new(1).with_max_latency(Duration::from_millis(100));
    for i in 0..5u8 {
        p.local.send(&[i; 4], &opts).unwrap();
    }
    assert_eq!(p.local_port.send_calls(), 0);

    assert!(eventually(|| p.remote_seen.event_count() == 5));
    assert_eq!(p.local_port.send_calls(), 1);
    assert_eq!(p.local.stats().tx_packets, 5);
    assert_eq!(p.local.stats().tx_transfers, 1);
}

#[test]
fn zero_latency_send_flushes_pending_burst() {
    let p = pair(PumpConfig::default());
    let slow = SendOptions::new(1).with_max_latency(Duration::from_secs(30));
    p.local.send(b"aaaa", &slow).unwrap();
    p.local.send(b"bbbb", &SendOptions::new(1)).unwrap();

    assert!(eventually(|| p.remote_seen.event_count() == 2));
}

#[test]
fn transient_failures_are_retried() {
    let p = pair(PumpConfig::default());
    p.local_port.fail_next_sends(2, true);
    p.local.send(b"once", &SendOptions::new(1)).unwrap();

    assert!(eventually(|| p.remote_seen.event_count() == 1));
    let stats = p.local.stats();
    assert_eq!(stats.tx_retries, 2);
    assert_eq!(stats.tx_dropped_bytes, 0);
}

#[test]
fn permanent_failure_drops_data_and_pump_keeps_going() {
    let p = pair(PumpConfig::default());
    p.local_port.fail_next_sends(1, false);
    p.local.send(b"lost", &SendOptions::new(1)).unwrap();
    assert!(eventually(|| p.local.stats().tx_dropped_bytes == 8));

    p.local.send(b"kept", &SendOptions::new(1)).unwrap();
    assert!(eventually(|| p.remote_seen.event_count() == 1));
    assert_eq!(p.remote_seen.events.lock().unwrap()[0].2, b"kept".to_vec());
}

#[test]
fn exhausted_retries_drop_the_batch() {
    let config = PumpConfig {
        tx_retry_limit: 1,
        ..PumpConfig::default()
    };
    let p = pair(config);
    p.local_port.fail_next_sends(5, true);
    p.local.send(b"gone", &SendOptions::new(1)).unwrap();

    assert!(eventually(|| p.local.stats().tx_dropped_bytes == 8));
    assert_eq!(p.local.stats().tx_retries, 1);
    assert_eq!(p.remote_seen.event_count(), 0);
}

#[test]
fn send_validation() {
    let p = pair(PumpConfig::default());
    let err = p.local.send(b"abc", &SendOptions::new(1)).unwrap_err();
    assert!(matches!(err, AdtError::InvalidArgument(_)));

    let err = p.local.send(b"", &SendOptions::new(1)).unwrap_err();
    assert!(matches!(err, AdtError::InvalidArgument(_)));

    let err = p
        .local
        .send(b"abcd", &SendOptions::new(1).request().response())
        .unwrap_err();
    assert!(matches!(err, AdtError::InvalidArgument(_)));

    // DISCONNECT may be empty.
    p.local
        .send(b"", &SendOptions::new(1).disconnect())
        .unwrap();
    assert!(eventually(|| p.remote_seen.event_count() == 1));
    assert_eq!(p.remote_seen.events.lock().unwrap()[0].0, PacketType::Disconnect);
}

#[test]
fn full_tx_ring_reports_would_block() {
    let config = PumpConfig {
        tx_buffer_size: 15,
        ..PumpConfig::default()
    };
    let p = pair(config);
    let parked = SendOptions::new(1).with_max_latency(Duration::from_secs(30));
    p.local.send(b"12345678", &parked).unwrap();

    let err = p.local.send(b"12345678", &parked).unwrap_err();
    assert!(err.is_would_block());

    p.local.flush();
    assert!(eventually(|| p.remote_seen.event_count() == 1));
    assert!(eventually(|| p.local.tx_usage() == 0));
    p.local.send(b"12345678", &parked).unwrap();
}

#[test]
fn announce_sends_connect() {
    let p = pair(PumpConfig::default());
    p.local.announce().unwrap();
    assert!(eventually(|| p.remote_seen.event_count() == 1));
    assert_eq!(
        p.remote_seen.events.lock().unwrap()[0],
        (PacketType::Connect, 0, Vec::new())
    );
}

#[test]
fn oversized_inbound_batch_is_missed() {
    let config = PumpConfig {
        rx_buffer_size: 31,
        ..PumpConfig::default()
    };
    let p = pair(config);
    let mut batch = BytesMut::new();
    for _ in 0..5 {
        encode_frame(PacketType::Normal, 1, b"12345678", &mut batch).unwrap();
    }
    p.remote.ingest(&batch);

    let stats = p.remote.stats();
    assert_eq!(stats.rx_missed_batches, 1);
    assert_eq!(stats.rx_missed_bytes, 60);
    assert_eq!(p.remote_seen.event_count(), 0);
}

#[test]
fn corrupt_tail_of_inbound_batch_is_cut() {
    let p = pair(PumpConfig::default());
    let mut batch = BytesMut::new();
    encode_frame(PacketType::Normal, 1, b"good", &mut batch).unwrap();
    batch.extend_from_slice(&[0x12, 0x34, 0x56, 0x78, 0x9A]);
    p.remote.ingest(&batch);

    assert!(eventually(|| p.remote_seen.event_count() == 1));
    assert_eq!(p.remote.stats().rx_corrupt, 1);
}

#[test]
fn monitor_bookkeeping() {
    let p = pair(PumpConfig::default());
    assert!(matches!(
        p.local.add_monitor(CHANNEL),
        Err(AdtError::AlreadyMonitored(CHANNEL))
    ));
    assert!(matches!(
        p.local.add_monitor(99),
        Err(AdtError::Port(PortError::NotFound(99)))
    ));
    assert!(matches!(
        p.local.del_monitor(99),
        Err(AdtError::NotMonitored(99))
    ));
    assert_eq!(p.local.channels(), vec![CHANNEL]);

    p.local.del_monitor(CHANNEL).unwrap();
    assert!(!p.local_port.is_open(CHANNEL));
}

#[test]
fn send_without_uplink_is_dropped_and_counted() {
    let p = pair(PumpConfig::default());
    p.local.del_monitor(CHANNEL).unwrap();
    p.local.send(b"void", &SendOptions::new(1)).unwrap();
    assert!(eventually(|| p.local.stats().tx_dropped_bytes == 8));
    assert_eq!(p.local_port.send_calls(), 0);
}

#[test]
fn release_closes_channels() {
    let p = pair(PumpConfig::default());
    let port = p.local_port.clone();
    assert!(port.is_open(CHANNEL));
    p.local.release().unwrap();
    assert!(!port.is_open(CHANNEL));
}

#[test]
fn bad_config_is_rejected_before_anything_starts() {
    let (a, _b) = LoopbackPort::pair(&[CHANNEL]);
    let config = PumpConfig {
        rx_buffer_size: 0,
        ..PumpConfig::default()
    };
    let result = AdtInstance::acquire(Arc::new(a), Arc::new(Recorder::default()), config);
    assert!(matches!(result, Err(AdtError::InvalidConfig(_))));
}

#[test]
fn unaligned_ring_size_is_rejected() {
    let (a, _b) = LoopbackPort::pair(&[CHANNEL]);
    let config = PumpConfig {
        rx_buffer_size: 16,
        ..PumpConfig::default()
    };
    let result = AdtInstance::acquire(Arc::new(a), Arc::new(Recorder::default()), config);
    assert!(matches!(result, Err(AdtError::InvalidConfig(_))));

    let (a, _b) = LoopbackPort::pair_with_alignment(&[CHANNEL], 2);
    let config = PumpConfig {
        tx_buffer_size: 17,
        ..PumpConfig::default()
    };
    let result = AdtInstance::acquire(Arc::new(a), Arc::new(Recorder::default()), config);
    assert!(matches!(result, Err(AdtError::InvalidConfig(_))));
}

#[test]
fn inbound_batch_stops_at_misaligned_packet() {
    let p = pair(PumpConfig::default());
    let mut batch = BytesMut::new();
    encode_frame(PacketType::Normal, 1, b"good", &mut batch).unwrap();
    encode_frame(PacketType::Normal, 1, b"odd", &mut batch).unwrap();
    encode_frame(PacketType::Normal, 1, b"lost", &mut batch).unwrap();
    p.remote.ingest(&batch);

    assert!(eventually(|| p.remote_seen.event_count() == 1));
    assert_eq!(p.remote.stats().rx_corrupt, 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(
        p.remote_seen.events.lock().unwrap().as_slice(),
        &[(PacketType::Normal, 1, b"good".to_vec())]
    );
}

#[test]
fn dispatch_follows_the_packet_variant() {
    let p = pair(PumpConfig::default());
    let mut batch = BytesMut::new();
    encode_frame(PacketType::Empty, 1, b"", &mut batch).unwrap();
    encode_frame(PacketType::Normal, 2, b"news", &mut batch).unwrap();
    encode_frame(PacketType::Response, 4, b"done", &mut batch).unwrap();
    encode_frame(PacketType::Connect, 0, b"", &mut batch).unwrap();
    p.remote.ingest(&batch);

    assert!(eventually(|| p.remote.stats().rx_packets == 3));
    assert_eq!(
        p.remote_seen.events.lock().unwrap().as_slice(),
        &[
            (PacketType::Normal, 2, b"news".to_vec()),
            (PacketType::Connect, 0, Vec::new()),
        ]
    );
    assert_eq!(
        p.remote_seen.responses.lock().unwrap().as_slice(),
        &[(4, b"done".to_vec())]
    );
}
