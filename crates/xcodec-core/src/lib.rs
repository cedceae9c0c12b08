//! Content-defined deduplication codec.
//!
//! Layered bottom-up: [`hash`] (rolling fingerprint) → [`tag`]/[`segment`]
//! (content-addressed data) → [`cache`] (bounded, tiered storage) →
//! [`window`] (recent-reference ring) → [`encoder`]/[`decoder`] (the codec
//! proper). None of this crate touches sockets or sessions; that lives in
//! `xcodec-pipe` and `wanproxy-net`.

mod cache;
mod decoder;
mod disk;
mod encoder;
mod error;
mod hash;
mod segment;
mod tag;
mod window;

pub use cache::{CachePair, MemoryCache, SegmentBacking, reconcile_extract};
pub use decoder::{DecodeOutcome, Decoder};
pub use disk::DiskCache;
pub use encoder::Encoder;
pub use error::{CodecError, Result};
pub use hash::{RollingHash, hash_segment};
pub use segment::{Segment, segment_from_slice};
pub use tag::Tag;
pub use window::{DEFAULT_WINDOW, SlidingWindow};
