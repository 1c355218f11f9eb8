//! Placing whole records into a ring.
//!
//! A record is never split across the physical wrap point. When it does not
//! fit the first clip but fits the second, the rest of the first clip is
//! padded with one DISCARD packet (or zero bytes when the gap is shorter
//! than a header) and the record goes at the start of the second clip.

use crate::codec::{checked_data_len, encode_packet_into, Header, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::kind::PacketType;
use crate::ring::RingWriter;

/// Where a record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Record length in bytes.
    pub len: usize,
    /// Padding written before the record to skip the wrap point.
    pub padding: usize,
}

impl Placement {
    /// Total bytes the write cursor advanced.
    pub fn advanced(&self) -> usize {
        self.len + self.padding
    }

    pub fn wrapped(&self) -> bool {
        self.padding > 0
    }
}

/// Place one contiguous record of `len` bytes, letting `fill` write it.
///
/// Fails with [`FrameError::WouldBlock`] when neither clip can hold the
/// whole record; `fill` is not called in that case.
pub fn place_record<F>(writer: &mut RingWriter<'_>, len: usize, fill: F) -> Result<Placement>
where
    F: FnOnce(&mut [u8]),
{
    if len == 0 {
        return Err(FrameError::InvalidArgument(
            "record length must be non-zero".into(),
        ));
    }
    if len > writer.capacity() {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: writer.capacity(),
        });
    }

    let mut fill = Some(fill);
    match try_place(writer, len, &mut fill) {
        Err(FrameError::WouldBlock) if writer.rewind_if_empty() => {
            try_place(writer, len, &mut fill)
        }
        other => other,
    }
}

fn try_place<F>(writer: &mut RingWriter<'_>, len: usize, fill: &mut Option<F>) -> Result<Placement>
where
    F: FnOnce(&mut [u8]),
{
    let consumed = writer.write(|first, second| {
        if first.len() >= len {
            if let Some(fill) = fill.take() {
                fill(&mut first[..len]);
            }
            len
        } else if second.len() >= len {
            pad_tail(first);
            if let Some(fill) = fill.take() {
                fill(&mut second[..len]);
            }
            first.len() + len
        } else {
            0
        }
    })?;

    if consumed == 0 {
        return Err(FrameError::WouldBlock);
    }
    Ok(Placement {
        len,
        padding: consumed - len,
    })
}

/// Fill the unusable tail of a clip so readers skip it.
///
/// With 4-byte alignment every tail is a whole number of headers; shorter
/// tails only occur on rings used with 1- or 2-byte alignment.
fn pad_tail(tail: &mut [u8]) {
    if tail.len() >= HEADER_SIZE {
        // Tail length is bounded by ring capacity, which fits in u16.
        let data_len = (tail.len() - HEADER_SIZE) as u16;
        tail[..HEADER_SIZE].copy_from_slice(&Header::new(PacketType::Discard, 0, data_len).encode());
    } else {
        tail.fill(0);
    }
}

/// Encode a packet built from `parts` straight into the ring.
pub fn write_packet(
    writer: &mut RingWriter<'_>,
    kind: PacketType,
    bit_flag: u8,
    parts: &[&[u8]],
) -> Result<Placement> {
    let payload_len: usize = parts.iter().map(|p| p.len()).sum();
    let header = Header::new(kind, bit_flag, checked_data_len(payload_len)?);
    place_record(writer, header.wire_size(), |dst| {
        encode_packet_into(dst, header, parts)
    })
}

/// Copy already-encoded bytes into the ring as one record.
pub fn write_raw(writer: &mut RingWriter<'_>, bytes: &[u8]) -> Result<Placement> {
    place_record(writer, bytes.len(), |dst| dst.copy_from_slice(bytes))
}
