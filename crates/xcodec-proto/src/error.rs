use thiserror::Error;

/// Errors raised while framing or parsing the wire protocol.
///
/// These are purely structural: they never depend on cache state or
/// session state, only on the bytes in front of the parser.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown pipe opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("LEARN count {count} exceeds maximum {max}")]
    LearnCountTooLarge { count: usize, max: usize },

    #[error("FRAME length {length} exceeds maximum {max}")]
    FrameTooLarge { length: usize, max: usize },

    #[error("HELLO payload length {length} exceeds maximum {max}")]
    HelloTooLarge { length: usize, max: usize },

    #[error("first frame on a pipe direction must be HELLO, got {0:#04x}")]
    HelloNotFirst(u8),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;
