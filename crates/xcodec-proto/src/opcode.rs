/// Marker byte that precedes every codec opcode inside an encoded stream.
///
/// Chosen, as in the original codec, to be a byte unlikely to occur in
/// arbitrary binary data on its own; its actual value only matters in that
/// encoder and decoder agree, and that raw occurrences of this byte are
/// escaped (see [`CodecOp::Escape`]).
pub const MAGIC: u8 = 0xf0;

/// Opcodes that appear inside an encoded byte stream, each preceded by
/// [`MAGIC`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecOp {
    /// A literal `MAGIC` byte in the original data.
    Escape,
    /// Defines a new segment inline.
    Extract,
    /// References a previously defined segment by tag.
    Ref,
    /// References a segment by position in the recent-emission window.
    Backref,
}

impl CodecOp {
    pub const ESCAPE: u8 = 0x00;
    pub const EXTRACT: u8 = 0x01;
    pub const REF: u8 = 0x02;
    pub const BACKREF: u8 = 0x03;

    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Escape => Self::ESCAPE,
            Self::Extract => Self::EXTRACT,
            Self::Ref => Self::REF,
            Self::Backref => Self::BACKREF,
        }
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            Self::ESCAPE => Some(Self::Escape),
            Self::EXTRACT => Some(Self::Extract),
            Self::REF => Some(Self::Ref),
            Self::BACKREF => Some(Self::Backref),
            _ => None,
        }
    }
}

/// Opcodes that frame messages on a pipe connecting two proxies.
///
/// Unlike [`CodecOp`], these are not preceded by [`MAGIC`]: each pipe
/// frame is a self-contained, length-delimited unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeOp {
    Advance,
    Frame,
    Ask,
    Learn,
    EosAck,
    Eos,
    Hello,
}

impl PipeOp {
    pub const ADVANCE: u8 = 0x01;
    pub const FRAME: u8 = 0x02;
    pub const ASK: u8 = 0xf0;
    pub const LEARN: u8 = 0xf1;
    pub const EOS_ACK: u8 = 0xfb;
    pub const EOS: u8 = 0xfc;
    pub const HELLO: u8 = 0xff;

    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Advance => Self::ADVANCE,
            Self::Frame => Self::FRAME,
            Self::Ask => Self::ASK,
            Self::Learn => Self::LEARN,
            Self::EosAck => Self::EOS_ACK,
            Self::Eos => Self::EOS,
            Self::Hello => Self::HELLO,
        }
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            Self::ADVANCE => Some(Self::Advance),
            Self::FRAME => Some(Self::Frame),
            Self::ASK => Some(Self::Ask),
            Self::LEARN => Some(Self::Learn),
            Self::EOS_ACK => Some(Self::EosAck),
            Self::EOS => Some(Self::Eos),
            Self::HELLO => Some(Self::Hello),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_op_round_trip() {
        for op in [CodecOp::Escape, CodecOp::Extract, CodecOp::Ref, CodecOp::Backref] {
            assert_eq!(CodecOp::from_byte(op.to_byte()), Some(op));
        }
    }

    #[test]
    fn pipe_op_round_trip() {
        for op in [
            PipeOp::Advance,
            PipeOp::Frame,
            PipeOp::Ask,
            PipeOp::Learn,
            PipeOp::EosAck,
            PipeOp::Eos,
            PipeOp::Hello,
        ] {
            assert_eq!(PipeOp::from_byte(op.to_byte()), Some(op));
        }
    }

    #[test]
    fn unknown_opcode_bytes_reject() {
        assert_eq!(CodecOp::from_byte(0x7f), None);
        assert_eq!(PipeOp::from_byte(0x7f), None);
    }
}
