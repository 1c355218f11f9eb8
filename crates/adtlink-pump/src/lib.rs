//! The per-transport packet pump ("ADT instance").
//!
//! An [`AdtInstance`] sits between a [`Port`](adtlink_port::Port) and one
//! consumer. Inbound batches land in an RX ring and are dispatched to a
//! [`PacketHandler`] by a dedicated RX thread. Outbound packets are placed
//! in a TX ring and handed to the port by a TX thread, either immediately
//! or once the tightest pending latency bound expires, so bursts of small
//! sends leave as one transfer.

pub mod config;
pub mod debounce;
pub mod error;
pub mod handler;
pub mod instance;
pub mod options;
mod pump;
pub mod stats;

pub use config::PumpConfig;
pub use debounce::Debouncer;
pub use error::{AdtError, Result};
pub use handler::PacketHandler;
pub use instance::AdtInstance;
pub use options::SendOptions;
pub use stats::{LogThrottle, StatsSnapshot};
