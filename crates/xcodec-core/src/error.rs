use thiserror::Error;

/// Errors raised by the codec layer: rolling hash, cache, encoder, decoder.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("BACKREF index {index} is outside the current window (len {window_len})")]
    BackrefOutOfWindow { index: u8, window_len: usize },

    #[error("unrecognised codec opcode {0:#04x}")]
    UnknownCodecOp(u8),

    #[error("wire protocol error: {0}")]
    Protocol(#[from] xcodec_proto::ProtocolError),

    #[error("cache entered a tag that was already present: {tag:#018x}")]
    DuplicateEnter { tag: u64 },

    #[error("cache replaced a tag that was not present: {tag:#018x}")]
    MissingReplace { tag: u64 },

    #[error("EXTRACT is forbidden against an out-of-band cache")]
    ExtractOnOutOfBandCache,
}

pub type Result<T> = std::result::Result<T, CodecError>;
