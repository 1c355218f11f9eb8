use crate::traits::ChannelId;

/// Errors reported by a [`Port`](crate::Port) implementation.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The transport does not know the channel id.
    #[error("channel {0} not found")]
    NotFound(ChannelId),

    /// The channel already has an inbound handler registered.
    #[error("channel {0} already open")]
    AlreadyOpen(ChannelId),

    /// The channel has not been opened on this end.
    #[error("channel {0} not open")]
    NotOpen(ChannelId),

    /// The transport is temporarily unable to accept data. Retrying may succeed.
    #[error("channel {0} busy")]
    Busy(ChannelId),

    /// An I/O error occurred in the underlying transport.
    #[error("port I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("port shut down")]
    Shutdown,
}

impl PortError {
    /// Whether the failure is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PortError::Busy(_) => true,
            PortError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PortError>;

#[cfg(test)]
mod tests {
    use std::io::{Error, ErrorKind};

    use super::*;

    #[test]
    fn busy_and_would_block_are_transient() {
        assert!(PortError::Busy(3).is_transient());
        assert!(PortError::Io(Error::from(ErrorKind::WouldBlock)).is_transient());
        assert!(PortError::Io(Error::from(ErrorKind::Interrupted)).is_transient());
    }

    #[test]
    fn hard_failures_are_not_transient() {
        assert!(!PortError::NotOpen(1).is_transient());
        assert!(!PortError::Shutdown.is_transient());
        assert!(!PortError::Io(Error::from(ErrorKind::BrokenPipe)).is_transient());
    }
}
