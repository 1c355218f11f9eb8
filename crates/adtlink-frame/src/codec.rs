use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::kind::{PacketType, MAGIC};

/// Packet header: type/magic (1) + bit_flag (1) + data_len (2) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Decoded packet header.
///
/// Wire format:
/// ```text
/// ┌───────────────────────┬──────────┬────────────┬──────────────────┐
/// │ byte 0                │ byte 1   │ bytes 2-3  │ bytes 4..        │
/// │ [7:4] magic [3:0] type│ bit_flag │ data_len LE│ data_len bytes   │
/// └───────────────────────┴──────────┴────────────┴──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: PacketType,
    pub bit_flag: u8,
    pub data_len: u16,
}

impl Header {
    pub fn new(kind: PacketType, bit_flag: u8, data_len: u16) -> Self {
        Self {
            kind,
            bit_flag,
            data_len,
        }
    }

    /// Header plus payload length.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.data_len as usize
    }

    /// Encode into the 4-byte wire header.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let [lo, hi] = self.data_len.to_le_bytes();
        [(MAGIC << 4) | (self.kind as u8), self.bit_flag, lo, hi]
    }

    /// Decode a header from the start of `bytes`.
    ///
    /// Checks magic and type only; the payload is not required to be present.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let magic = bytes[0] >> 4;
        if magic != MAGIC {
            return Err(FrameError::InvalidMagic(magic));
        }
        let nibble = bytes[0] & 0x0F;
        let kind = PacketType::from_nibble(nibble).ok_or(FrameError::UnknownType(nibble))?;
        Ok(Self {
            kind,
            bit_flag: bytes[1],
            data_len: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }
}

/// Addressing and payload shared by every dispatchable packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Body<'a> {
    pub bit_flag: u8,
    pub payload: &'a [u8],
}

/// Tagged, borrowed view of a dispatchable packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Normal(Body<'a>),
    Request(Body<'a>),
    Response(Body<'a>),
    Connect(Body<'a>),
    Disconnect(Body<'a>),
}

impl<'a> Packet<'a> {
    pub fn body(&self) -> Body<'a> {
        match *self {
            Packet::Normal(body)
            | Packet::Request(body)
            | Packet::Response(body)
            | Packet::Connect(body)
            | Packet::Disconnect(body) => body,
        }
    }

    pub fn kind(&self) -> PacketType {
        match self {
            Packet::Normal(_) => PacketType::Normal,
            Packet::Request(_) => PacketType::Request,
            Packet::Response(_) => PacketType::Response,
            Packet::Connect(_) => PacketType::Connect,
            Packet::Disconnect(_) => PacketType::Disconnect,
        }
    }

    pub fn bit_flag(&self) -> u8 {
        self.body().bit_flag
    }

    pub fn payload(&self) -> &'a [u8] {
        self.body().payload
    }

    /// Header plus payload length.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload().len()
    }

    /// Copy into an owned [`Frame`].
    pub fn to_frame(&self) -> Frame {
        Frame::new(self.kind(), self.bit_flag(), Bytes::copy_from_slice(self.payload()))
    }
}

/// A packet validated against the clip it was read from.
///
/// Borrows directly from ring or batch bytes; nothing is copied.
#[derive(Debug, Clone, Copy)]
pub struct Decoded<'a> {
    pub header: Header,
    /// Payload bytes (`data_len` long).
    pub payload: &'a [u8],
    /// Header and payload exactly as they appear on the wire.
    pub raw: &'a [u8],
}

impl<'a> Decoded<'a> {
    pub fn kind(&self) -> PacketType {
        self.header.kind
    }

    pub fn bit_flag(&self) -> u8 {
        self.header.bit_flag
    }

    pub fn wire_size(&self) -> usize {
        self.raw.len()
    }

    /// The tagged view, or `None` for non-dispatchable types.
    pub fn packet(&self) -> Option<Packet<'a>> {
        let body = Body {
            bit_flag: self.header.bit_flag,
            payload: self.payload,
        };
        Some(match self.header.kind {
            PacketType::Normal => Packet::Normal(body),
            PacketType::Request => Packet::Request(body),
            PacketType::Response => Packet::Response(body),
            PacketType::Connect => Packet::Connect(body),
            PacketType::Disconnect => Packet::Disconnect(body),
            PacketType::Invalid | PacketType::Empty | PacketType::Discard => return None,
        })
    }

    /// Copy into an owned [`Frame`].
    pub fn to_frame(&self) -> Frame {
        Frame {
            kind: self.header.kind,
            bit_flag: self.header.bit_flag,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }
}

/// Decode the packet at the start of `clip`.
///
/// The header is validated against the remaining clip length before any
/// payload byte is exposed; nothing past `clip.len()` is ever touched.
pub fn decode_packet(clip: &[u8]) -> Result<Decoded<'_>> {
    let header = Header::decode(clip)?;
    let total = header.wire_size();
    if clip.len() < total {
        return Err(FrameError::Truncated {
            needed: total,
            available: clip.len(),
        });
    }
    Ok(Decoded {
        header,
        payload: &clip[HEADER_SIZE..total],
        raw: &clip[..total],
    })
}

/// Write header and payload parts into `dst`, which must be exactly
/// `HEADER_SIZE + sum(parts)` long.
pub fn encode_packet_into(dst: &mut [u8], header: Header, parts: &[&[u8]]) {
    dst[..HEADER_SIZE].copy_from_slice(&header.encode());
    let mut offset = HEADER_SIZE;
    for part in parts {
        dst[offset..offset + part.len()].copy_from_slice(part);
        offset += part.len();
    }
}

/// An owned packet, as handed to multiplexer clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: PacketType,
    pub bit_flag: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: PacketType, bit_flag: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            bit_flag,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append the wire encoding to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode_frame(self.kind, self.bit_flag, &self.payload, dst)
    }
}

/// Append one encoded packet to `dst`.
pub fn encode_frame(
    kind: PacketType,
    bit_flag: u8,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let data_len = checked_data_len(payload.len())?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&Header::new(kind, bit_flag, data_len).encode());
    dst.put_slice(payload);
    Ok(())
}

/// Convert a payload length into the 16-bit header field.
pub fn checked_data_len(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| FrameError::PayloadTooLarge {
        size: len,
        max: MAX_PAYLOAD,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_bit_exact() {
        let header = Header::new(PacketType::Request, 0b0000_0100, 0x0102);
        assert_eq!(header.encode(), [0xA3, 0x04, 0x02, 0x01]);
        assert_eq!(Header::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn decode_roundtrip_preserves_bytes() {
        let mut buf = BytesMut::new();
        encode_frame(PacketType::Normal, 0x81, b"abcdef", &mut buf).unwrap();
        let decoded = decode_packet(&buf).unwrap();

        assert_eq!(decoded.kind(), PacketType::Normal);
        assert_eq!(decoded.bit_flag(), 0x81);
        assert_eq!(decoded.payload, b"abcdef");
        assert_eq!(decoded.wire_size(), HEADER_SIZE + 6);

        let mut again = BytesMut::new();
        decoded.to_frame().encode(&mut again).unwrap();
        assert_eq!(again, buf);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let bytes = [0x52, 0x00, 0x00, 0x00];
        assert!(matches!(
            decode_packet(&bytes),
            Err(FrameError::InvalidMagic(0x5))
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let bytes = [0xA9, 0x00, 0x00, 0x00];
        assert!(matches!(
            decode_packet(&bytes),
            Err(FrameError::UnknownType(9))
        ));
    }

    #[test]
    fn short_header_is_truncated() {
        assert!(matches!(
            decode_packet(&[0xA2, 0x01]),
            Err(FrameError::Truncated {
                needed: HEADER_SIZE,
                available: 2
            })
        ));
    }

    #[test]
    fn length_past_clip_is_truncated() {
        let header = Header::new(PacketType::Normal, 1, 8).encode();
        let mut clip = header.to_vec();
        clip.extend_from_slice(b"1234");
        assert!(matches!(
            decode_packet(&clip),
            Err(FrameError::Truncated {
                needed: 12,
                available: 8
            })
        ));
    }

    #[test]
    fn packet_view_variants() {
        let mut buf = BytesMut::new();
        encode_frame(PacketType::Response, 0, b"ok..", &mut buf).unwrap();
        let decoded = decode_packet(&buf).unwrap();
        let packet = decoded.packet().unwrap();
        assert_eq!(
            packet,
            Packet::Response(Body {
                bit_flag: 0,
                payload: b"ok..",
            })
        );
        assert_eq!(packet.kind(), PacketType::Response);
        assert_eq!(packet.wire_size(), decoded.wire_size());
        assert_eq!(packet.to_frame(), decoded.to_frame());

        let discard = Header::new(PacketType::Discard, 0, 0).encode();
        assert_eq!(decode_packet(&discard).unwrap().packet(), None);
    }

    #[test]
    fn encode_into_with_parts() {
        let header = Header::new(PacketType::Normal, 2, 8);
        let mut dst = [0u8; 12];
        encode_packet_into(&mut dst, header, &[b"abcd", b"efgh"]);
        let decoded = decode_packet(&dst).unwrap();
        assert_eq!(decoded.payload, b"abcdefgh");
    }

    #[test]
    fn oversized_payload_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_frame(PacketType::Normal, 0, &payload, &mut buf),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn frame_wire_size() {
        let frame = Frame::new(PacketType::Normal, 1, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), HEADER_SIZE + 4);
    }
}
