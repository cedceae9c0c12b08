use std::sync::Arc;

use xcodec_proto::SEGMENT_LENGTH;

/// A fixed-length, immutable, reference-counted block of codec data.
///
/// `Arc` gives us atomic ref-counting for free, which is what lets segments
/// be shared across the cache, both sliding windows, and any in-flight
/// pipe-session bookkeeping without a separate ref/unref protocol.
pub type Segment = Arc<[u8; SEGMENT_LENGTH]>;

/// Build a [`Segment`] from a byte slice known to be exactly
/// [`SEGMENT_LENGTH`] bytes long.
///
/// # Panics
///
/// Panics if `bytes.len() != SEGMENT_LENGTH`. Callers in this crate only
/// ever invoke this once a length check has already happened (the encoder
/// only considers full windows; the decoder validates body length before
/// calling this).
#[must_use]
#[allow(clippy::expect_used)]
pub fn segment_from_slice(bytes: &[u8]) -> Segment {
    let array: [u8; SEGMENT_LENGTH] =
        bytes.try_into().expect("invariant: caller validated slice length == SEGMENT_LENGTH");
    Arc::new(array)
}
