use tracing::error;
use uuid::Uuid;

use crate::cache::SegmentBacking;
use crate::segment::{Segment, segment_from_slice};
use crate::tag::Tag;

/// Disk-backed segment cache, persisted across process restarts with
/// [`sled`]. Segments stored here were not necessarily learned through the
/// live codec stream (they may predate this process), so `out_of_band`
/// always reports `true`: the encoder must never emit `EXTRACT` against a
/// `DiskCache`, only `REF` for tags it already holds.
pub struct DiskCache {
    uuid: Uuid,
    tree: sled::Tree,
}

impl DiskCache {
    /// # Errors
    ///
    /// Returns a [`sled::Error`] if the database cannot be opened.
    pub fn open(path: &std::path::Path, uuid: Uuid) -> sled::Result<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree(uuid.as_bytes())?;
        Ok(Self { uuid, tree })
    }
}

impl SegmentBacking for DiskCache {
    fn enter(&self, tag: Tag, segment: Segment) {
        if let Err(err) = self.tree.insert(tag.get().to_be_bytes(), segment.as_slice()) {
            error!(%tag, %err, "failed to persist segment to disk cache");
        }
    }

    fn replace(&self, tag: Tag, segment: Segment) {
        self.enter(tag, segment);
    }

    fn lookup(&self, tag: Tag) -> Option<Segment> {
        match self.tree.get(tag.get().to_be_bytes()) {
            Ok(Some(bytes)) => Some(segment_from_slice(&bytes)),
            Ok(None) => None,
            Err(err) => {
                error!(%tag, %err, "failed to read from disk cache");
                None
            }
        }
    }

    fn out_of_band(&self) -> bool {
        true
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }
}
