use std::collections::HashSet;
use std::sync::Arc;

use xcodec_proto::{CodecOp, MAGIC};

use crate::cache::{SegmentBacking, reconcile_extract};
use crate::error::{CodecError, Result};
use crate::hash::hash_segment;
use crate::segment::segment_from_slice;
use crate::tag::Tag;
use crate::window::SlidingWindow;

/// Result of one [`Decoder::decode`] call.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// The entire input was consumed (modulo a trailing incomplete opcode,
    /// which is simply left unconsumed for the next call).
    Done { output: Vec<u8>, consumed: usize },
    /// Decoding hit a `REF` to a tag this side's cache does not hold. The
    /// caller must request those segments (typically via a pipe-level
    /// `ASK`) and resume decoding the same buffer, starting at `consumed`,
    /// once a `LEARN` has supplied them.
    NeedLearn { output: Vec<u8>, consumed: usize, unknown_hashes: Vec<Tag> },
}

/// Inverse of [`crate::encoder::Encoder`]: turns an opcode-tagged stream
/// back into the original bytes.
pub struct Decoder {
    cache: Arc<dyn SegmentBacking>,
    window: SlidingWindow,
}

impl Decoder {
    #[must_use]
    pub fn new(cache: Arc<dyn SegmentBacking>, window: SlidingWindow) -> Self {
        Self { cache, window }
    }

    #[must_use]
    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Decode as much of `input` as possible.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BackrefOutOfWindow`] if a `BACKREF` names a
    /// position not currently held, and [`CodecError::UnknownCodecOp`] for
    /// any opcode byte that isn't one of escape/extract/ref/backref —
    /// both are fatal to the stream per the protocol's decoder table.
    pub fn decode(&mut self, input: &[u8]) -> Result<DecodeOutcome> {
        let segment_len = xcodec_proto::SEGMENT_LENGTH;
        let mut output = Vec::with_capacity(input.len());
        let mut pos = 0usize;

        while pos < input.len() {
            if input[pos] != MAGIC {
                output.push(input[pos]);
                pos += 1;
                continue;
            }

            let Some(&op_byte) = input.get(pos + 1) else { break };
            let Some(op) = CodecOp::from_byte(op_byte) else {
                return Err(CodecError::UnknownCodecOp(op_byte));
            };

            match op {
                CodecOp::Escape => {
                    output.push(MAGIC);
                    pos += 2;
                }
                CodecOp::Extract => {
                    let body_start = pos + 2;
                    let Some(chunk) = input.get(body_start..body_start + segment_len) else {
                        break;
                    };
                    let tag = hash_segment(chunk);
                    let segment = segment_from_slice(chunk);
                    let resolved = reconcile_extract(self.cache.as_ref(), tag, segment);
                    self.window.declare(tag, resolved.clone());
                    output.extend_from_slice(resolved.as_slice());
                    pos = body_start + segment_len;
                }
                CodecOp::Ref => {
                    let body_start = pos + 2;
                    let Some(tag_bytes) = input.get(body_start..body_start + 8) else { break };
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(tag_bytes);
                    let tag = Tag::new(u64::from_be_bytes(raw));

                    match self.cache.lookup(tag) {
                        Some(segment) => {
                            self.window.declare(tag, segment.clone());
                            output.extend_from_slice(segment.as_slice());
                            pos = body_start + 8;
                        }
                        None => {
                            let unknown = skim(self.cache.as_ref(), &input[pos..]);
                            return Ok(DecodeOutcome::NeedLearn {
                                output,
                                consumed: pos,
                                unknown_hashes: unknown,
                            });
                        }
                    }
                }
                CodecOp::Backref => {
                    let body_start = pos + 2;
                    let Some(&index) = input.get(body_start) else { break };
                    let Some((tag, segment)) = self.window.dereference_with_tag(index) else {
                        return Err(CodecError::BackrefOutOfWindow {
                            index,
                            window_len: self.window.len(),
                        });
                    };
                    output.extend_from_slice(segment.as_slice());
                    self.window.declare(tag, segment);
                    pos = body_start + 1;
                }
            }
        }

        Ok(DecodeOutcome::Done { output, consumed: pos })
    }
}

/// Walk `input` (starting at a blocking `REF`) without mutating cache or
/// window state, collecting tags referenced by `REF` that are neither
/// already cached nor defined later in the same buffer by an `EXTRACT`.
/// Used to batch `ASK` requests instead of asking one tag at a time.
fn skim(cache: &dyn SegmentBacking, input: &[u8]) -> Vec<Tag> {
    let segment_len = xcodec_proto::SEGMENT_LENGTH;
    let mut defined = HashSet::new();
    let mut pos = 0usize;
    while pos < input.len() {
        if input[pos] != MAGIC {
            pos += 1;
            continue;
        }
        let Some(&op_byte) = input.get(pos + 1) else { break };
        let Some(op) = CodecOp::from_byte(op_byte) else { break };
        match op {
            CodecOp::Escape => pos += 2,
            CodecOp::Extract => {
                let body_start = pos + 2;
                let Some(chunk) = input.get(body_start..body_start + segment_len) else { break };
                defined.insert(hash_segment(chunk));
                pos = body_start + segment_len;
            }
            CodecOp::Ref => {
                let body_start = pos + 2;
                if input.get(body_start..body_start + 8).is_none() {
                    break;
                }
                pos = body_start + 8;
            }
            CodecOp::Backref => {
                let body_start = pos + 2;
                if input.get(body_start).is_none() {
                    break;
                }
                pos = body_start + 1;
            }
        }
    }

    let mut seen = HashSet::new();
    let mut unknown = Vec::new();
    pos = 0;
    while pos < input.len() {
        if input[pos] != MAGIC {
            pos += 1;
            continue;
        }
        let Some(&op_byte) = input.get(pos + 1) else { break };
        let Some(op) = CodecOp::from_byte(op_byte) else { break };
        match op {
            CodecOp::Escape => pos += 2,
            CodecOp::Extract => {
                let body_start = pos + 2;
                let Some(chunk) = input.get(body_start..body_start + segment_len) else { break };
                pos = body_start + segment_len;
                let _ = chunk;
            }
            CodecOp::Ref => {
                let body_start = pos + 2;
                let Some(tag_bytes) = input.get(body_start..body_start + 8) else { break };
                let mut raw = [0u8; 8];
                raw.copy_from_slice(tag_bytes);
                let tag = Tag::new(u64::from_be_bytes(raw));
                if cache.lookup(tag).is_none() && !defined.contains(&tag) && seen.insert(tag) {
                    unknown.push(tag);
                }
                pos = body_start + 8;
            }
            CodecOp::Backref => {
                let body_start = pos + 2;
                if input.get(body_start).is_none() {
                    break;
                }
                pos = body_start + 1;
            }
        }
    }

    unknown
}
