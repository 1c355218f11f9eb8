/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Error from the underlying ADT instance.
    #[error(transparent)]
    Adt(#[from] adtlink_pump::AdtError),

    /// Ring or framing error on a client buffer.
    #[error("frame error: {0}")]
    Frame(#[from] adtlink_frame::FrameError),

    /// Client index outside the fixed slot table.
    #[error("client index {0} out of range 0..8")]
    InvalidClient(usize),

    /// The slot is already taken.
    #[error("client {0} already registered")]
    AlreadyRegistered(usize),

    /// The slot is empty.
    #[error("client {0} not registered")]
    NotRegistered(usize),

    /// The client was unregistered or the multiplexer released.
    #[error("client {0} closed")]
    Closed(usize),
}

impl MuxError {
    /// Whether the shared TX ring had no room for the packet.
    pub fn is_would_block(&self) -> bool {
        match self {
            MuxError::Adt(err) => err.is_would_block(),
            MuxError::Frame(err) => err.is_would_block(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
