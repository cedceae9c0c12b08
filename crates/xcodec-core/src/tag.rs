use std::fmt;

/// A 64-bit content fingerprint identifying a [`crate::segment::Segment`].
///
/// Tags are content-addressed but not cryptographically collision
/// resistant: two distinct segments may hash to the same tag. Callers that
/// bind a tag to a segment (the cache) must byte-compare on hit and
/// `replace` on mismatch rather than trusting the tag alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u64);

impl Tag {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl From<u64> for Tag {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Tag> for u64 {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}
