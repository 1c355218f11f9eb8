use adtlink_port::ChannelId;

/// Errors that can occur in ADT instance operations.
#[derive(Debug, thiserror::Error)]
pub enum AdtError {
    /// Transport-level error.
    #[error("port error: {0}")]
    Port(#[from] adtlink_port::PortError),

    /// Ring buffer or framing error.
    #[error("frame error: {0}")]
    Frame(#[from] adtlink_frame::FrameError),

    /// A send request is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The pump configuration is unusable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A pump or timer thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },

    /// The channel is already registered on this instance.
    #[error("channel {0} already monitored")]
    AlreadyMonitored(ChannelId),

    /// The channel is not registered on this instance.
    #[error("channel {0} not monitored")]
    NotMonitored(ChannelId),
}

impl AdtError {
    /// Whether the TX ring had no room for the record.
    pub fn is_would_block(&self) -> bool {
        matches!(self, AdtError::Frame(err) if err.is_would_block())
    }
}

pub type Result<T> = std::result::Result<T, AdtError>;
