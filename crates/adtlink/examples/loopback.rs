//! Loopback demo: a remote instance sends to two local clients.
//!
//! Run with: cargo run -p adtlink --example loopback

use std::sync::Arc;
use std::time::Duration;

use adtlink::frame::{Body, Packet};
use adtlink::mux::{ClientEvent, MuxConfig, Multiplexer};
use adtlink::port::{LoopbackPort, Port};
use adtlink::pump::{AdtInstance, PacketHandler, PumpConfig, SendOptions};

struct PrintResponses;

impl PacketHandler for PrintResponses {
    fn on_event(&self, packet: Packet<'_>) {
        println!("remote: {} from bits {:08b}", packet.kind(), packet.bit_flag());
    }

    fn on_response(&self, response: Body<'_>) {
        println!(
            "remote: RSP {:?}",
            String::from_utf8_lossy(response.payload)
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    const CHANNEL: u32 = 1;
    let (local, remote_port) = LoopbackPort::pair(&[CHANNEL]);

    let mux = Multiplexer::new(Arc::new(local), MuxConfig::default())?;
    mux.add_monitor(CHANNEL)?;
    let alice = mux.register_client(0)?;
    let bob = mux.register_client(1)?;

    let remote_port: Arc<dyn Port> = Arc::new(remote_port);
    let remote = AdtInstance::acquire(remote_port, Arc::new(PrintResponses), PumpConfig::default())?;
    remote.add_monitor(CHANNEL)?;
    remote.announce()?;

    remote.send(b"to both!", &SendOptions::new(0b11))?;
    remote.send(b"bob only", &SendOptions::new(0b10).request())?;

    for (name, client) in [("alice", &alice), ("bob", &bob)] {
        while let Some(ClientEvent::Packet(frame)) = client.recv(Some(Duration::from_millis(200)))? {
            println!(
                "{name}: {} {:?}",
                frame.kind,
                String::from_utf8_lossy(&frame.payload)
            );
            if frame.kind == adtlink::frame::PacketType::Request {
                mux.send_as(client.index(), &[b"ack!"], &SendOptions::new(0).response())?;
            }
        }
    }

    std::thread::sleep(Duration::from_millis(50));
    mux.release()?;
    remote.release()?;
    Ok(())
}
