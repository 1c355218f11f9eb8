use adtlink_frame::{Body, Packet};

/// Receives packets read off the RX ring by the RX pump.
///
/// Both methods run on the RX pump thread with the packet still borrowed
/// from the ring; implementations copy what they keep and return quickly.
pub trait PacketHandler: Send + Sync {
    /// NORMAL, REQUEST, CONNECT and DISCONNECT packets.
    fn on_event(&self, packet: Packet<'_>);

    /// RSP packets.
    fn on_response(&self, response: Body<'_>);
}
