/// Errors raised by the ring buffer and the packet codec.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Ring capacity is zero or above the hard maximum.
    #[error("invalid ring capacity {capacity} (must be 1..={max})")]
    InvalidCapacity { capacity: usize, max: usize },

    /// A caller-supplied argument is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Backing storage could not be allocated.
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    /// The ring has no room (write) or no data (read).
    #[error("ring buffer would block")]
    WouldBlock,

    /// A clip callback reported more bytes than it was offered.
    #[error("clip callback consumed {consumed} bytes but only {offered} were offered")]
    Corruption { consumed: usize, offered: usize },

    /// The header magic nibble does not match.
    #[error("invalid packet magic 0x{0:x}")]
    InvalidMagic(u8),

    /// The header type nibble is outside the known range.
    #[error("unknown packet type {0}")]
    UnknownType(u8),

    /// The clip ends before the packet does.
    #[error("truncated packet ({available} bytes available, {needed} needed)")]
    Truncated { needed: usize, available: usize },

    /// The payload length is not a multiple of the transport alignment.
    #[error("payload length {len} is not a multiple of {alignment}")]
    Misaligned { len: usize, alignment: usize },

    /// The payload does not fit the 16-bit length field or the ring.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

impl FrameError {
    /// Whether this error is ring backpressure rather than a fault.
    pub fn is_would_block(&self) -> bool {
        matches!(self, FrameError::WouldBlock)
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
