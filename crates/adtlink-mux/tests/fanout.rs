use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use adtlink_frame::{Body, Packet, PacketType};
use adtlink_port::{ChannelId, LoopbackPort, Port};
use adtlink_pump::{AdtError, AdtInstance, PacketHandler, PumpConfig, SendOptions};
use adtlink_mux::{ClientEvent, MuxConfig, MuxError, Multiplexer, Readiness};

const CHANNEL: ChannelId = 3;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(PacketType, u8, Vec<u8>)>>,
}

impl PacketHandler for Recorder {
    fn on_event(&self, packet: Packet<'_>) {
        self.seen
            .lock()
            .unwrap()
            .push((packet.kind(), packet.bit_flag(), packet.payload().to_vec()));
    }

    fn on_response(&self, response: Body<'_>) {
        self.on_event(Packet::Response(response));
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

struct Rig {
    mux: Multiplexer,
    remote: AdtInstance,
    remote_seen: Arc<Recorder>,
}

fn rig(config: PumpConfig) -> Rig {
    let (local, remote_port) = LoopbackPort::pair(&[CHANNEL]);
    let mux = Multiplexer::new(Arc::new(local), MuxConfig::from(config.clone()))
        .expect("multiplexer should start");
    mux.add_monitor(CHANNEL).expect("monitor should register");

    let remote_seen = Arc::new(Recorder::default());
    let remote_port: Arc<dyn Port> = Arc::new(remote_port);
    let remote = AdtInstance::acquire(remote_port, remote_seen.clone(), config)
        .expect("remote should start");
    remote.add_monitor(CHANNEL).expect("monitor should register");
    Rig {
        mux,
        remote,
        remote_seen,
    }
}

fn to(bits: u8) -> SendOptions {
    SendOptions::new(bits)
}

#[test]
fn packet_lands_only_in_the_addressed_client() {
    let r = rig(PumpConfig::default());
    let client0 = r.mux.register_client(0).unwrap();
    let client2 = r.mux.register_client(2).unwrap();

    r.remote.send(b"wxyz", &to(0b0000_0100)).unwrap();

    assert!(eventually(|| client2.usage() == 4 + 4));
    assert_eq!(client0.usage(), 0);
    assert!(!client0.poll().readable);

    match client2.try_recv().unwrap() {
        Some(ClientEvent::Packet(frame)) => {
            assert_eq!(frame.kind, PacketType::Normal);
            assert_eq!(frame.payload.as_ref(), b"wxyz");
        }
        other => panic!("expected packet, got {other:?}"),
    }
}

#[test]
fn full_client_misses_while_others_still_receive() {
    let r = rig(PumpConfig {
        rx_buffer_size: 19,
        ..PumpConfig::default()
    });
    let a = r.mux.register_client(0).unwrap();
    let b = r.mux.register_client(1).unwrap();

    for n in 1..=2usize {
        r.remote.send(b"aaaa", &to(0b01)).unwrap();
        assert!(eventually(|| a.usage() == 8 * n));
    }
    r.remote.send(b"both", &to(0b11)).unwrap();

    assert!(eventually(|| b.usage() == 8));
    assert!(eventually(|| a.missed() == 1));
    assert_eq!(a.usage(), 16);
    assert_eq!(b.missed(), 0);

    // A keeps its earlier data in order.
    for _ in 0..2 {
        match a.try_recv().unwrap() {
            Some(ClientEvent::Packet(frame)) => assert_eq!(frame.payload.as_ref(), b"aaaa"),
            other => panic!("expected packet, got {other:?}"),
        }
    }
}

#[test]
fn first_connect_is_quiet_second_broadcasts_reset() {
    let r = rig(PumpConfig::default());
    let c0 = r.mux.register_client(0).unwrap();
    let c5 = r.mux.register_client(5).unwrap();

    r.remote.announce().unwrap();
    assert!(eventually(|| r.mux.stats().connects == 1));
    assert!(!c0.poll().reset);
    assert!(!c5.poll().reset);
    assert!(matches!(c0.recv(Some(Duration::from_millis(20))), Ok(None)));

    r.remote.send(b"kept", &to(0b01)).unwrap();
    assert!(eventually(|| c0.usage() == 8));

    r.remote.announce().unwrap();
    assert!(eventually(|| c0.poll().reset && c5.poll().reset));
    assert_eq!(r.mux.stats().resets, 1);

    assert_eq!(c0.recv(Some(Duration::from_secs(1))).unwrap(), Some(ClientEvent::Reset));
    match c0.recv(Some(Duration::from_secs(1))).unwrap() {
        Some(ClientEvent::Packet(frame)) => assert_eq!(frame.payload.as_ref(), b"kept"),
        other => panic!("buffered packet should survive the reset, got {other:?}"),
    }
    assert_eq!(c5.recv(Some(Duration::from_secs(1))).unwrap(), Some(ClientEvent::Reset));
    assert!(matches!(c5.recv(Some(Duration::from_millis(20))), Ok(None)));
}

#[test]
fn connect_is_never_fanned_out() {
    let r = rig(PumpConfig::default());
    let c = r.mux.register_client(0).unwrap();
    r.remote.announce().unwrap();
    assert!(eventually(|| r.mux.stats().connects == 1));
    assert_eq!(c.usage(), 0);
}

#[test]
fn readiness_follows_reset_and_connect() {
    let r = rig(PumpConfig::default());
    assert_eq!(r.mux.readiness(), Readiness::Ready);

    r.mux.notify_remote_reset();
    assert_eq!(r.mux.readiness(), Readiness::NotReady);

    r.remote.announce().unwrap();
    assert!(eventually(|| r.mux.readiness() == Readiness::Ready));
}

#[test]
fn registration_rules() {
    let r = rig(PumpConfig::default());
    let handle = r.mux.register_client(4).unwrap();
    assert!(matches!(
        r.mux.register_client(4),
        Err(MuxError::AlreadyRegistered(4))
    ));
    assert!(matches!(
        r.mux.register_client(8),
        Err(MuxError::InvalidClient(8))
    ));

    assert!(r.mux.unregister_client(4).unwrap());
    assert!(!r.mux.unregister_client(4).unwrap());
    assert!(matches!(handle.try_recv(), Err(MuxError::Closed(4))));
    assert!(matches!(handle.recv(None), Err(MuxError::Closed(4))));

    let again = r.mux.register_client(4).unwrap();
    assert_eq!(again.index(), 4);
    assert!(r.mux.client(4).is_some());
    assert!(r.mux.client(6).is_none());
}

#[test]
fn send_as_stamps_the_client_bit() {
    let r = rig(PumpConfig::default());
    r.mux.register_client(3).unwrap();
    r.mux
        .send_as(3, &[b"ab", b"cd"], &to(0xFF).request())
        .unwrap();

    assert!(eventually(|| r.remote_seen.seen.lock().unwrap().len() == 1));
    assert_eq!(
        r.remote_seen.seen.lock().unwrap()[0],
        (PacketType::Request, 0b0000_1000, b"abcd".to_vec())
    );

    assert!(matches!(
        r.mux.send_as(6, &[b"abcd"], &to(0)),
        Err(MuxError::NotRegistered(6))
    ));
    let big = vec![0u8; r.mux.config().scratch_size() + 1];
    assert!(matches!(
        r.mux.send_as(3, &[big.as_slice()], &to(0)),
        Err(MuxError::Frame(_))
    ));
}

#[test]
fn notify_exit_sends_disconnect_to_one_bit() {
    let r = rig(PumpConfig::default());
    r.mux.notify_exit(1).unwrap();

    assert!(eventually(|| r.remote_seen.seen.lock().unwrap().len() == 1));
    assert_eq!(
        r.remote_seen.seen.lock().unwrap()[0],
        (PacketType::Disconnect, 0b0000_0010, Vec::new())
    );
    assert!(matches!(r.mux.notify_exit(9), Err(MuxError::InvalidClient(9))));
}

#[test]
fn blocked_reader_wakes_on_delivery() {
    let r = rig(PumpConfig::default());
    let c = r.mux.register_client(7).unwrap();
    let reader = {
        let c = c.clone();
        thread::spawn(move || c.recv(Some(Duration::from_secs(5))))
    };
    thread::sleep(Duration::from_millis(20));
    r.remote.send(b"wake", &to(0b1000_0000)).unwrap();

    match reader.join().unwrap().unwrap() {
        Some(ClientEvent::Packet(frame)) => assert_eq!(frame.payload.as_ref(), b"wake"),
        other => panic!("expected packet, got {other:?}"),
    }
}

#[test]
fn release_closes_clients_and_forgets_readiness() {
    let r = rig(PumpConfig::default());
    let c = r.mux.register_client(0).unwrap();
    r.mux.release().unwrap();

    assert_eq!(c.remote_readiness(), Readiness::Unknown);
    assert!(matches!(c.recv(None), Err(MuxError::Closed(0))));
}

#[test]
fn dropping_the_multiplexer_closes_clients() {
    let r = rig(PumpConfig::default());
    let c = r.mux.register_client(3).unwrap();
    drop(r.mux);

    assert_eq!(c.remote_readiness(), Readiness::Unknown);
    assert!(matches!(c.try_recv(), Err(MuxError::Closed(3))));
}

#[test]
fn client_ring_size_must_match_transport_alignment() {
    let (local, _remote) = LoopbackPort::pair(&[CHANNEL]);
    let config = MuxConfig::from(PumpConfig {
        rx_buffer_size: 16,
        ..PumpConfig::default()
    });
    assert!(matches!(
        Multiplexer::new(Arc::new(local), config),
        Err(MuxError::Adt(AdtError::InvalidConfig(_)))
    ));
}

#[test]
fn stats_serialize() {
    let r = rig(PumpConfig::default());
    r.mux.register_client(1).unwrap();
    let json = serde_json::to_value(r.mux.stats()).unwrap();
    assert_eq!(json["readiness"], "ready");
    assert_eq!(json["clients"][0]["index"], 1);
}
