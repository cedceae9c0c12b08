//! Wire-level framing for the WAN acceleration protocol.
//!
//! This crate owns exactly the byte-level concerns: opcode values, frame
//! layouts, and structural encode/decode. It knows nothing about caches,
//! sessions, or sliding windows — that logic lives in `xcodec-core` (the
//! codec) and `xcodec-pipe` (the session driver).

mod error;
mod frame;
mod opcode;

pub use error::{ProtocolError, Result};
pub use frame::{
    HELLO_LENGTH, MAX_FRAME_LENGTH, MAX_LEARN_COUNT, PipeFrame, SEGMENT_LENGTH,
};
pub use opcode::{CodecOp, MAGIC, PipeOp};
