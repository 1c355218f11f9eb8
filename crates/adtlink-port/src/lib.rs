//! Transport abstraction for the adtlink packet pump.
//!
//! A [`Port`] moves opaque, already-framed byte batches between this side
//! and a remote coprocessor. Inbound batches are pushed into a handler
//! registered at [`Port::open`]; outbound bytes are handed over with
//! [`Port::send`].
//!
//! This is the lowest layer of adtlink. [`LoopbackPort`] provides an
//! in-memory pair of connected ports for tests and simulation.

pub mod error;
pub mod loopback;
pub mod traits;

pub use error::{PortError, Result};
pub use loopback::LoopbackPort;
pub use traits::{ChannelId, InboundHandler, Port, DEFAULT_ALIGNMENT};
