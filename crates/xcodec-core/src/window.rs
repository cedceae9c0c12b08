use std::collections::VecDeque;

use crate::segment::Segment;
use crate::tag::Tag;

/// Default sliding-window capacity. Index `0` is always the most recently
/// declared entry.
pub const DEFAULT_WINDOW: usize = 256;

/// Ring of the most recently declared `(tag, segment)` pairs, shared
/// between encoder and decoder. Both sides must advance it on exactly the
/// same events (one declaration per emitted/consumed reference) or the
/// sides desync and `BACKREF` indices stop lining up.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    entries: VecDeque<(Tag, Segment)>,
}

impl SlidingWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: VecDeque::with_capacity(capacity) }
    }

    /// Declare that `tag`/`segment` was just emitted or consumed, becoming
    /// index `0` for subsequent `BACKREF`s.
    pub fn declare(&mut self, tag: Tag, segment: Segment) {
        self.entries.push_front((tag, segment));
        self.entries.truncate(self.capacity);
    }

    /// Positions already holding `tag` within the window, nearest first.
    /// Used by the encoder to decide between `BACKREF` and `REF`.
    #[must_use]
    pub fn position_of(&self, tag: Tag) -> Option<u8> {
        self.entries.iter().position(|(t, _)| *t == tag).map(|idx| idx as u8)
    }

    /// Resolve a `BACKREF` index to its `(tag, segment)` pair, owned, so
    /// the caller can re-declare it at the front of the window.
    #[must_use]
    pub fn dereference_with_tag(&self, index: u8) -> Option<(Tag, Segment)> {
        self.entries.get(index as usize).map(|(tag, seg)| (*tag, seg.clone()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::segment_from_slice;

    fn seg(byte: u8) -> Segment {
        segment_from_slice(&[byte; xcodec_proto::SEGMENT_LENGTH])
    }

    #[test]
    fn most_recent_declaration_is_index_zero() {
        let mut window = SlidingWindow::new(4);
        window.declare(Tag::new(1), seg(1));
        window.declare(Tag::new(2), seg(2));
        assert_eq!(window.position_of(Tag::new(2)), Some(0));
        assert_eq!(window.position_of(Tag::new(1)), Some(1));
    }

    #[test]
    fn window_truncates_to_capacity() {
        let mut window = SlidingWindow::new(2);
        window.declare(Tag::new(1), seg(1));
        window.declare(Tag::new(2), seg(2));
        window.declare(Tag::new(3), seg(3));
        assert_eq!(window.len(), 2);
        assert_eq!(window.position_of(Tag::new(1)), None);
        assert_eq!(window.position_of(Tag::new(3)), Some(0));
    }

    #[test]
    fn dereference_with_tag_missing_index_is_none() {
        let window = SlidingWindow::new(4);
        assert!(window.dereference_with_tag(0).is_none());
    }
}
