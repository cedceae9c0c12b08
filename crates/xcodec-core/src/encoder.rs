use std::collections::HashSet;
use std::sync::Arc;

use xcodec_proto::{CodecOp, MAGIC};

use crate::cache::{SegmentBacking, reconcile_extract};
use crate::hash::hash_segment;
use crate::segment::segment_from_slice;
use crate::tag::Tag;
use crate::window::SlidingWindow;

/// Output of one [`Encoder::encode`] call: the opcode-tagged bytes plus
/// every tag referenced within them (by `EXTRACT`, `REF`, or `BACKREF`).
/// The tag set lets a pipe session track which cache entries a given
/// outbound `FRAME` depends on, for `ADVANCE` accounting.
#[derive(Debug, Default)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub tags: HashSet<Tag>,
}

/// Transforms a raw byte stream into an opcode-tagged stream, replacing
/// recurring `SEGMENT_LENGTH`-byte chunks with references into a shared
/// cache.
///
/// One `Encoder` is owned by one direction of one codec pipe; its cache and
/// sliding window persist across calls to [`Encoder::encode`] so that
/// dedup opportunities spanning separate `encode` calls are still found.
///
/// Whenever a chunk is matched (by any of `BACKREF`/`REF`/`EXTRACT`), the
/// scan position jumps forward by a full segment length rather than one
/// byte. Three or more matches in a row therefore already produce the
/// "greedy, non-overlapping" chunking the original codec favours near
/// cache-heavy regions — no separate counter or mode switch is needed, a
/// miss simply falls back to byte-at-a-time resynchronisation.
pub struct Encoder {
    cache: Arc<dyn SegmentBacking>,
    window: SlidingWindow,
}

impl Encoder {
    #[must_use]
    pub fn new(cache: Arc<dyn SegmentBacking>, window: SlidingWindow) -> Self {
        Self { cache, window }
    }

    #[must_use]
    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Encode one buffer. Cache and window state persist for the next
    /// call; undersized trailing bytes are flushed as escaped literals.
    pub fn encode(&mut self, input: &[u8]) -> Encoded {
        let segment_len = xcodec_proto::SEGMENT_LENGTH;
        let mut output = Vec::with_capacity(input.len());
        let mut tags = HashSet::new();
        let mut pos = 0usize;

        while pos + segment_len <= input.len() {
            let candidate = &input[pos..pos + segment_len];
            let tag = hash_segment(candidate);

            if let Some(cached) = self.cache.lookup(tag) {
                if cached.as_slice() == candidate {
                    if let Some(index) = self.window.position_of(tag) {
                        output.push(MAGIC);
                        output.push(CodecOp::Backref.to_byte());
                        output.push(index);
                    } else {
                        output.push(MAGIC);
                        output.push(CodecOp::Ref.to_byte());
                        output.extend_from_slice(&tag.get().to_be_bytes());
                    }
                    self.window.declare(tag, cached);
                    tags.insert(tag);
                    pos += segment_len;
                    continue;
                }
            }

            if !self.cache.out_of_band() {
                let segment = segment_from_slice(candidate);
                let resolved = reconcile_extract(self.cache.as_ref(), tag, segment);
                self.window.declare(tag, resolved);
                output.push(MAGIC);
                output.push(CodecOp::Extract.to_byte());
                output.extend_from_slice(candidate);
                tags.insert(tag);
                pos += segment_len;
                continue;
            }

            push_literal(&mut output, input[pos]);
            pos += 1;
        }

        for &byte in &input[pos..] {
            push_literal(&mut output, byte);
        }

        Encoded { bytes: output, tags }
    }
}

fn push_literal(output: &mut Vec<u8>, byte: u8) {
    if byte == MAGIC {
        output.push(MAGIC);
        output.push(CodecOp::Escape.to_byte());
    } else {
        output.push(byte);
    }
}
