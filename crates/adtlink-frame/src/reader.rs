//! Walking packets out of clips.

use crate::codec::{decode_packet, Decoded, Frame, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::kind::PacketType;
use crate::ring::RingReader;

/// Why a clip scan stopped before the end of the clip.
#[derive(Debug)]
pub enum StopReason {
    /// A DISCARD sentinel pads the rest of the clip.
    Discard,
    /// Fewer than [`HEADER_SIZE`] bytes remain.
    Padding,
    /// The bytes at the stop offset do not form a valid packet.
    Corrupt(FrameError),
}

/// Result of [`scan_clip`].
#[derive(Debug)]
pub struct ClipScan {
    /// Length of the well-formed packet prefix.
    pub valid: usize,
    /// Packets visited, including non-dispatchable EMPTY/INVALID ones.
    pub packets: usize,
    /// Set when the scan ended before the clip did.
    pub stop: Option<StopReason>,
}

impl ClipScan {
    pub fn is_corrupt(&self) -> bool {
        matches!(self.stop, Some(StopReason::Corrupt(_)))
    }
}

/// Visit each well-formed packet at the start of `clip`, in order.
///
/// Stops at the first DISCARD sentinel, bad header, truncated packet, or
/// sub-header tail. Nothing past `clip.len()` is read.
pub fn scan_clip<'a, F>(clip: &'a [u8], on_packet: F) -> ClipScan
where
    F: FnMut(&Decoded<'a>),
{
    scan_aligned(clip, 1, on_packet)
}

/// [`scan_clip`] that also stops, as corruption, at a packet whose payload
/// length is not a multiple of `alignment`.
pub fn scan_aligned<'a, F>(clip: &'a [u8], alignment: usize, mut on_packet: F) -> ClipScan
where
    F: FnMut(&Decoded<'a>),
{
    let alignment = alignment.max(1);
    let mut offset = 0usize;
    let mut packets = 0usize;

    while offset < clip.len() {
        let rest = &clip[offset..];
        if rest.len() < HEADER_SIZE {
            return ClipScan {
                valid: offset,
                packets,
                stop: Some(StopReason::Padding),
            };
        }
        match decode_packet(rest) {
            Ok(decoded) if decoded.kind() == PacketType::Discard => {
                return ClipScan {
                    valid: offset,
                    packets,
                    stop: Some(StopReason::Discard),
                };
            }
            Ok(decoded) if decoded.payload.len() % alignment != 0 => {
                return ClipScan {
                    valid: offset,
                    packets,
                    stop: Some(StopReason::Corrupt(FrameError::Misaligned {
                        len: decoded.payload.len(),
                        alignment,
                    })),
                };
            }
            Ok(decoded) => {
                on_packet(&decoded);
                packets += 1;
                offset += decoded.wire_size();
            }
            Err(err) => {
                return ClipScan {
                    valid: offset,
                    packets,
                    stop: Some(StopReason::Corrupt(err)),
                };
            }
        }
    }

    ClipScan {
        valid: offset,
        packets,
        stop: None,
    }
}

/// Pop the next deliverable packet from a ring as an owned [`Frame`].
///
/// Padding, DISCARD sentinels, EMPTY/INVALID packets, and corrupt bytes at
/// the head of the ring are consumed and skipped. Returns `Ok(None)` once
/// the ring is empty.
pub fn next_frame(reader: &mut RingReader<'_>) -> Result<Option<Frame>> {
    loop {
        let mut frame = None;
        let read = reader.read(|first, _second| match decode_packet(first) {
            Ok(decoded) if decoded.kind().is_dispatchable() => {
                frame = Some(decoded.to_frame());
                decoded.wire_size()
            }
            Ok(decoded) if decoded.kind() != PacketType::Discard => decoded.wire_size(),
            // Discard, padding, or corruption: drop the rest of this clip.
            _ => first.len(),
        });

        match read {
            Ok(_) => {
                if let Some(frame) = frame {
                    return Ok(Some(frame));
                }
            }
            Err(FrameError::WouldBlock) => return Ok(None),
            Err(err) => return Err(err),
        }
    }
}
