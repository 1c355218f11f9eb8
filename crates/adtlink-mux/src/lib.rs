//! Fan-out of one ADT instance to up to eight local clients.
//!
//! The [`Multiplexer`] owns the instance and a fixed table of client
//! slots. Every inbound packet is copied into the private ring of each
//! registered client selected by its `bit_flag`, so backpressure stays
//! per client. CONNECT packets drive the remote [`Readiness`] state and,
//! after the first one, a reset broadcast to all clients.

pub mod client;
pub mod config;
pub mod error;
pub mod mux;
pub mod readiness;

pub use client::{ClientEvent, ClientHandle, ClientStats, PollFlags};
pub use config::MuxConfig;
pub use error::{MuxError, Result};
pub use mux::{MuxStats, Multiplexer};
pub use readiness::Readiness;
