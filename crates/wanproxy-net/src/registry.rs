//! Process-wide segment-cache registry.
//!
//! Every codec pipe needs two caches: its own (advertised to the peer in
//! `HELLO`) and a mirror of whatever cache its peer advertises. Both are
//! looked up by [`Uuid`] in one process-wide table, shared across every
//! connection so that dedup opportunities between unrelated connections to
//! the same peer are still found. Concurrent lookups from many accepted
//! connections are the common case, so the table is a [`DashMap`] rather
//! than a single `Mutex`-guarded `HashMap`.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;
use xcodec_core::{DiskCache, MemoryCache, SegmentBacking};
use xcodec_pipe::CacheProvider;

/// Lazily-populated table of segment caches, keyed by cache namespace.
///
/// A namespace resolved for the first time gets a fresh, bounded
/// [`MemoryCache`]. A namespace pre-registered with [`CacheRegistry::register_disk`]
/// (an interface configured with a `disk_path`) instead resolves to a
/// [`DiskCache`] opened ahead of time, matching that type's
/// `out_of_band() == true` contract: its contents may predate this process,
/// so the encoder must never treat it as something it just taught the peer.
pub struct CacheRegistry {
    caches: DashMap<Uuid, Arc<dyn SegmentBacking>>,
    byte_limit: usize,
}

impl CacheRegistry {
    /// Build a registry whose lazily-created memory caches are each sized
    /// to hold `byte_limit` bytes worth of segments (see
    /// [`MemoryCache::with_byte_limit`]).
    #[must_use]
    pub fn new(byte_limit: usize) -> Self {
        Self { caches: DashMap::new(), byte_limit }
    }

    /// Number of distinct cache namespaces currently resident.
    #[must_use]
    pub fn namespace_count(&self) -> usize {
        self.caches.len()
    }

    /// Pre-register `uuid` as backed by a disk-persisted cache opened at
    /// `path`, so that the first [`CacheProvider::resolve`] for it returns
    /// the disk cache instead of creating a fresh, empty memory cache.
    ///
    /// Must be called before the interface owning `uuid` starts accepting
    /// connections; registering a namespace that has already been resolved
    /// once (and so already has a memory cache cached under it) silently
    /// loses that cache's contents, but nothing in this process ever calls
    /// it that way.
    ///
    /// # Errors
    ///
    /// Returns a [`sled::Error`] if the on-disk database cannot be opened.
    pub fn register_disk(&self, uuid: Uuid, path: &Path) -> sled::Result<()> {
        let disk = DiskCache::open(path, uuid)?;
        self.caches.insert(uuid, Arc::new(disk));
        Ok(())
    }
}

impl CacheProvider for CacheRegistry {
    fn resolve(&self, uuid: Uuid) -> Arc<dyn SegmentBacking> {
        let entry = self
            .caches
            .entry(uuid)
            .or_insert_with(|| Arc::new(MemoryCache::with_byte_limit(uuid, self.byte_limit)));
        entry.value().clone()
    }
}
