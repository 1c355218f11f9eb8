//! Framed message transfer between a remote coprocessor and local clients.
//!
//! adtlink moves packets over one shared transport channel, buffering
//! them in split-capable ring buffers, pumping them with one RX and one TX
//! thread, and fanning inbound traffic out to up to eight clients.
//!
//! # Crate Structure
//!
//! - [`port`]: transport abstraction and the in-memory loopback pair
//! - [`frame`]: ring buffer, packet header codec, record placement
//! - [`pump`]: the ADT instance (RX/TX pumps, coalescing timer)
//! - [`mux`]: client fan-out and remote readiness (behind `mux` feature)

/// Re-export transport types.
pub mod port {
    pub use adtlink_port::*;
}

/// Re-export ring buffer and framing types.
pub mod frame {
    pub use adtlink_frame::*;
}

/// Re-export ADT instance types.
pub mod pump {
    pub use adtlink_pump::*;
}

/// Re-export multiplexer types (requires `mux` feature).
#[cfg(feature = "mux")]
pub mod mux {
    pub use adtlink_mux::*;
}
