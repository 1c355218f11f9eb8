use std::sync::Arc;

use crate::error::Result;

/// Identifier of a transport channel.
pub type ChannelId = u32;

/// Alignment every payload length and ring offset must respect unless a port
/// reports otherwise.
pub const DEFAULT_ALIGNMENT: usize = 4;

/// Callback invoked by the transport with a batch of inbound bytes.
///
/// The transport guarantees at most one concurrent invocation per channel id.
/// The handler runs in the transport's calling context and must not block.
pub type InboundHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// The transport an ADT instance sends and receives framed bytes through.
///
/// Implementations give no delivery guarantee: `send` returning `Ok` only
/// means the transport accepted the bytes.
pub trait Port: Send + Sync {
    /// Check that the transport knows `id`.
    fn lookup(&self, id: ChannelId) -> Result<()>;

    /// Open `id` and register the handler for its inbound batches.
    fn open(&self, id: ChannelId, inbound: InboundHandler) -> Result<()>;

    /// Close `id`, returning the handler that was registered for it.
    fn close(&self, id: ChannelId) -> Result<InboundHandler>;

    /// Hand `bytes` to the transport. Returns the number of bytes accepted.
    fn send(&self, id: ChannelId, bytes: &[u8]) -> Result<usize>;

    /// Fixed alignment of payload lengths on this transport.
    fn alignment(&self) -> usize {
        DEFAULT_ALIGNMENT
    }
}
