//! Packet types and recipient masks.
//!
//! The low nibble of the first header byte carries the [`PacketType`], the
//! high nibble carries [`MAGIC`]. The second byte is the `bit_flag`
//! recipient mask: bit *i* addresses local client *i*.

/// Magic nibble stamped into every header. A mismatch stops parsing a clip.
pub const MAGIC: u8 = 0xA;

/// Number of recipients addressable by a `bit_flag`.
pub const MAX_RECIPIENTS: usize = 8;

/// Packet type carried in the low header nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Invalid = 0,
    Empty = 1,
    Normal = 2,
    Request = 3,
    Response = 4,
    /// Padding up to the physical end of a ring. Never delivered.
    Discard = 5,
    Disconnect = 6,
    Connect = 7,
}

impl PacketType {
    /// Decode the type nibble.
    pub fn from_nibble(value: u8) -> Option<Self> {
        Some(match value {
            0 => PacketType::Invalid,
            1 => PacketType::Empty,
            2 => PacketType::Normal,
            3 => PacketType::Request,
            4 => PacketType::Response,
            5 => PacketType::Discard,
            6 => PacketType::Disconnect,
            7 => PacketType::Connect,
            _ => return None,
        })
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Invalid => "INVALID",
            PacketType::Empty => "EMPTY",
            PacketType::Normal => "NORMAL",
            PacketType::Request => "REQUEST",
            PacketType::Response => "RSP",
            PacketType::Discard => "DISCARD",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::Connect => "CONNECT",
        }
    }

    /// Whether packets of this type are handed to event or response handlers.
    pub fn is_dispatchable(self) -> bool {
        matches!(
            self,
            PacketType::Normal
                | PacketType::Request
                | PacketType::Response
                | PacketType::Connect
                | PacketType::Disconnect
        )
    }

    /// Whether a packet of this type may carry an empty payload.
    pub fn allows_empty_payload(self) -> bool {
        matches!(
            self,
            PacketType::Connect | PacketType::Disconnect | PacketType::Empty
        )
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The `bit_flag` addressing recipient `index` alone.
pub fn recipient_bit(index: usize) -> Option<u8> {
    if index < MAX_RECIPIENTS {
        Some(1u8 << index)
    } else {
        None
    }
}

/// Iterate the recipient indices selected by `bit_flag`, lowest first.
pub fn recipients(bit_flag: u8) -> impl Iterator<Item = usize> {
    (0..MAX_RECIPIENTS).filter(move |i| bit_flag & (1u8 << i) != 0)
}
