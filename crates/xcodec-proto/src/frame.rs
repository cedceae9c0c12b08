//! Pipe-protocol wire frames.
//!
//! A [`PipeFrame`] is the semantic, decoded form of one message exchanged
//! between two proxies over a codec pipe. Encoding/decoding here is purely
//! structural: no cache, window, or session state is touched. Session logic
//! (ASK/LEARN interlock, ADVANCE accounting, EOS handshake) lives one layer
//! up, in `xcodec-pipe`.

use bytes::{Buf, BufMut, Bytes};

use crate::{
    error::{ProtocolError, Result},
    opcode::PipeOp,
};

/// Length in bytes of one codec segment. Fixed at the only value the
/// protocol currently deploys.
pub const SEGMENT_LENGTH: usize = 128;

/// Upper bound on the number of segments carried by a single `LEARN`.
pub const MAX_LEARN_COUNT: usize = u16::MAX as usize;

/// Upper bound on the byte length of a single `FRAME` payload.
pub const MAX_FRAME_LENGTH: usize = 1 << 24;

/// Byte length of the `HELLO` body: a 16-byte cache UUID plus one flags byte.
pub const HELLO_LENGTH: usize = 17;

/// One decoded message on a codec pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeFrame {
    /// First frame on a pipe direction; carries the sender's cache UUID and
    /// a flags byte (currently unused, reserved for future negotiation).
    Hello { uuid: [u8; 16], flags: u8 },
    /// Supplies segments the peer asked for (or is primed with, on HELLO).
    Learn { segments: Vec<Bytes> },
    /// Requests segments by tag.
    Ask { tags: Vec<u64> },
    /// Carries one chunk of encoded payload.
    Frame { payload: Bytes },
    /// Acknowledges receipt of `count` outstanding `Frame`s, in order.
    Advance { count: u32 },
    /// No further `Frame`s will be sent on this direction.
    Eos,
    /// Acknowledges an `Eos`; the sender will read no more.
    EosAck,
}

impl PipeFrame {
    #[must_use]
    pub fn opcode(&self) -> PipeOp {
        match self {
            Self::Hello { .. } => PipeOp::Hello,
            Self::Learn { .. } => PipeOp::Learn,
            Self::Ask { .. } => PipeOp::Ask,
            Self::Frame { .. } => PipeOp::Frame,
            Self::Advance { .. } => PipeOp::Advance,
            Self::Eos => PipeOp::Eos,
            Self::EosAck => PipeOp::EosAck,
        }
    }

    /// Encode this frame onto `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if a size limit (`LEARN` count, `FRAME` length,
    /// `HELLO` body) would be exceeded on the wire.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        dst.put_u8(self.opcode().to_byte());
        match self {
            Self::Hello { uuid, flags } => {
                dst.put_u8(u8::try_from(HELLO_LENGTH).unwrap_or(u8::MAX));
                dst.put_slice(uuid);
                dst.put_u8(*flags);
            }
            Self::Learn { segments } => {
                if segments.len() > MAX_LEARN_COUNT {
                    return Err(ProtocolError::LearnCountTooLarge {
                        count: segments.len(),
                        max: MAX_LEARN_COUNT,
                    });
                }
                dst.put_u16(segments.len() as u16);
                for segment in segments {
                    debug_assert_eq!(segment.len(), SEGMENT_LENGTH);
                    dst.put_slice(segment);
                }
            }
            Self::Ask { tags } => {
                dst.put_u16(tags.len() as u16);
                for tag in tags {
                    dst.put_u64(*tag);
                }
            }
            Self::Frame { payload } => {
                if payload.len() > MAX_FRAME_LENGTH {
                    return Err(ProtocolError::FrameTooLarge {
                        length: payload.len(),
                        max: MAX_FRAME_LENGTH,
                    });
                }
                dst.put_u32(payload.len() as u32);
                dst.put_slice(payload);
            }
            Self::Advance { count } => dst.put_u32(*count),
            Self::Eos | Self::EosAck => {}
        }
        Ok(())
    }

    /// Attempt to decode one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` if `src` does not yet contain a complete frame
    /// (the caller should read more bytes and retry); this is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error for an unrecognised opcode or a declared size that
    /// exceeds the protocol's limits.
    pub fn decode(src: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(&op_byte) = src.first() else { return Ok(None) };
        let Some(op) = PipeOp::from_byte(op_byte) else {
            return Err(ProtocolError::UnknownOpcode(op_byte));
        };
        let body = &src[1..];

        match op {
            PipeOp::Hello => {
                let Some(&len) = body.first() else { return Ok(None) };
                let len = len as usize;
                if len != HELLO_LENGTH {
                    return Err(ProtocolError::HelloTooLarge { length: len, max: HELLO_LENGTH });
                }
                if body.len() < 1 + len {
                    return Ok(None);
                }
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&body[1..17]);
                let flags = body[17];
                Ok(Some((Self::Hello { uuid, flags }, 1 + 1 + len)))
            }
            PipeOp::Learn => {
                if body.len() < 2 {
                    return Ok(None);
                }
                let count = u16::from_be_bytes([body[0], body[1]]) as usize;
                let total_body = 2 + count * SEGMENT_LENGTH;
                if body.len() < total_body {
                    return Ok(None);
                }
                let mut segments = Vec::with_capacity(count);
                let mut cursor = &body[2..total_body];
                for _ in 0..count {
                    segments.push(Bytes::copy_from_slice(&cursor[..SEGMENT_LENGTH]));
                    cursor.advance(SEGMENT_LENGTH);
                }
                Ok(Some((Self::Learn { segments }, 1 + total_body)))
            }
            PipeOp::Ask => {
                if body.len() < 2 {
                    return Ok(None);
                }
                let count = u16::from_be_bytes([body[0], body[1]]) as usize;
                let total_body = 2 + count * 8;
                if body.len() < total_body {
                    return Ok(None);
                }
                let mut tags = Vec::with_capacity(count);
                let mut cursor = &body[2..total_body];
                for _ in 0..count {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&cursor[..8]);
                    tags.push(u64::from_be_bytes(raw));
                    cursor.advance(8);
                }
                Ok(Some((Self::Ask { tags }, 1 + total_body)))
            }
            PipeOp::Frame => {
                if body.len() < 4 {
                    return Ok(None);
                }
                let length =
                    u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
                if length > MAX_FRAME_LENGTH {
                    return Err(ProtocolError::FrameTooLarge { length, max: MAX_FRAME_LENGTH });
                }
                let total_body = 4 + length;
                if body.len() < total_body {
                    return Ok(None);
                }
                let payload = Bytes::copy_from_slice(&body[4..total_body]);
                Ok(Some((Self::Frame { payload }, 1 + total_body)))
            }
            PipeOp::Advance => {
                if body.len() < 4 {
                    return Ok(None);
                }
                let count = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                Ok(Some((Self::Advance { count }, 1 + 4)))
            }
            PipeOp::Eos => Ok(Some((Self::Eos, 1))),
            PipeOp::EosAck => Ok(Some((Self::EosAck, 1))),
        }
    }
}
