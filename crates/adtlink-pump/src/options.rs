use std::time::Duration;

use adtlink_frame::PacketType;

use crate::error::{AdtError, Result};

/// Per-send flags.
///
/// The packet type follows from the flags: `needs_response` sends a
/// REQUEST, `is_response` an RSP, `disconnect` a DISCONNECT, and anything
/// else a NORMAL packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub needs_response: bool,
    pub is_response: bool,
    pub disconnect: bool,
    /// Recipient mask stamped into the header.
    pub bit_flag: u8,
    /// Upper bound on how long the packet may sit in the TX ring.
    /// Zero flushes immediately.
    pub max_latency: Duration,
}

impl SendOptions {
    pub fn new(bit_flag: u8) -> Self {
        Self {
            bit_flag,
            ..Self::default()
        }
    }

    pub fn request(mut self) -> Self {
        self.needs_response = true;
        self
    }

    pub fn response(mut self) -> Self {
        self.is_response = true;
        self
    }

    pub fn disconnect(mut self) -> Self {
        self.disconnect = true;
        self
    }

    pub fn with_max_latency(mut self, max_latency: Duration) -> Self {
        self.max_latency = max_latency;
        self
    }

    /// Resolve the flags into a packet type.
    pub fn packet_type(&self) -> Result<PacketType> {
        match (self.needs_response, self.is_response, self.disconnect) {
            (true, true, _) => Err(AdtError::InvalidArgument(
                "a packet cannot both need a response and be one".into(),
            )),
            (true, false, _) => Ok(PacketType::Request),
            (false, true, _) => Ok(PacketType::Response),
            (false, false, true) => Ok(PacketType::Disconnect),
            (false, false, false) => Ok(PacketType::Normal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_select_packet_type() {
        assert_eq!(SendOptions::new(1).packet_type().unwrap(), PacketType::Normal);
        assert_eq!(
            SendOptions::new(1).request().packet_type().unwrap(),
            PacketType::Request
        );
        assert_eq!(
            SendOptions::new(1).response().packet_type().unwrap(),
            PacketType::Response
        );
        assert_eq!(
            SendOptions::new(1).disconnect().packet_type().unwrap(),
            PacketType::Disconnect
        );
    }

    #[test]
    fn request_and_response_conflict() {
        let opts = SendOptions::new(0).request().response();
        assert!(matches!(opts.packet_type(), Err(AdtError::InvalidArgument(_))));
    }
}
