use thiserror::Error;

/// Errors raised by the pipe-level session driver: HELLO/ASK/LEARN/ADVANCE/EOS
/// sequencing on top of the wire protocol and codec layers.
#[derive(Debug, Error)]
pub enum PipeError {
    /// A frame failed to parse, or a size limit was exceeded on encode.
    #[error(transparent)]
    Protocol(#[from] xcodec_proto::ProtocolError),

    /// The codec layer rejected an opcode sequence.
    #[error(transparent)]
    Codec(#[from] xcodec_core::CodecError),

    /// A second `HELLO` arrived on a direction that already completed one.
    #[error("duplicate HELLO on an already-established pipe direction")]
    DuplicateHello,

    /// Peer `ASK`ed for a tag this side never sent (and so never cached
    /// under its own namespace). Fatal: the peer's view of our cache has
    /// diverged from reality.
    #[error("peer asked for tag {0:#018x}, which this side never extracted")]
    AskUnknownTag(u64),

    /// Peer sent `EOS` twice on the same direction.
    #[error("peer sent EOS twice")]
    DuplicateEos,

    /// `EOS_ACK` arrived before we ever sent `EOS`.
    #[error("received EOS_ACK but no EOS was sent on this direction")]
    UnsolicitedEosAck,

    /// `ADVANCE` acknowledged more frames than are outstanding.
    #[error("ADVANCE acknowledged {count} frame(s) but only {outstanding} are outstanding")]
    AdvanceOverrun {
        /// Count carried by the offending `ADVANCE`.
        count: u32,
        /// Number of frames actually awaiting acknowledgement.
        outstanding: usize,
    },
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, PipeError>;
