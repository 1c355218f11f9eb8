//! Ring buffering and packet framing for adtlink.
//!
//! Two pieces live here:
//! - [`RingBuffer`]: a fixed-capacity byte queue whose reads and writes are
//!   offered as up to two contiguous clips, with separate producer and
//!   consumer locks and a [`ReadySignal`] for blocking consumers.
//! - The packet format: a 4-byte header (type + magic nibble, `bit_flag`
//!   recipient mask, 16-bit payload length) followed by the payload.
//!   Records are written whole, padded past the wrap point with a DISCARD
//!   sentinel, and decoded in place as borrowed [`Decoded`] views that
//!   dispatch as a tagged [`Packet`].

pub mod codec;
pub mod error;
pub mod kind;
pub mod reader;
pub mod ring;
pub mod writer;

pub use codec::{
    checked_data_len, decode_packet, encode_frame, encode_packet_into, Body, Decoded, Frame,
    Header, Packet, HEADER_SIZE, MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use kind::{recipient_bit, recipients, PacketType, MAGIC, MAX_RECIPIENTS};
pub use reader::{next_frame, scan_aligned, scan_clip, ClipScan, StopReason};
pub use ring::{ReadySignal, RingBuffer, RingReader, RingWriter, Wait, MAX_CAPACITY};
pub use writer::{place_record, write_packet, write_raw, Placement};
