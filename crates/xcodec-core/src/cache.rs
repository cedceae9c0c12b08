use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use tracing::warn;
use uuid::Uuid;

use crate::segment::Segment;
use crate::tag::Tag;

/// Pluggable backing for a segment cache.
///
/// Mirrors the original codec's `XCodecCache` hierarchy: a cache is keyed
/// by tag, bounded, and associated with a namespace (`uuid`) that lets two
/// proxy processes agree on what cache they are both referring to.
pub trait SegmentBacking: Send + Sync {
    /// Bind `tag` to `segment`. Precondition: `tag` is absent. If at
    /// capacity, the implementation evicts before inserting.
    fn enter(&self, tag: Tag, segment: Segment);

    /// Rebind `tag` to `segment`, overwriting any existing binding. Used on
    /// hash collisions (`EXTRACT` naming a tag already bound to different
    /// bytes).
    fn replace(&self, tag: Tag, segment: Segment);

    /// Look up `tag`, refreshing its recency on hit.
    fn lookup(&self, tag: Tag) -> Option<Segment>;

    /// Hint that a higher cache tier observed a hit for `tag`; refresh
    /// recency if present, otherwise do nothing.
    fn touch(&self, tag: Tag) {
        let _ = tag;
    }

    /// Whether this cache's contents were learned outside the encoded
    /// stream (e.g. a pre-shared disk cache). The encoder must not emit
    /// `EXTRACT` against an out-of-band cache.
    fn out_of_band(&self) -> bool;

    /// Namespace identifying this cache to a peer.
    fn uuid(&self) -> Uuid;
}

struct MemoryCacheInner {
    entries: HashMap<Tag, (Segment, u64)>,
    lru_index: BTreeMap<u64, Tag>,
    next_counter: u64,
}

impl MemoryCacheInner {
    fn touch_counter(&mut self, tag: Tag, old_counter: u64) -> u64 {
        self.lru_index.remove(&old_counter);
        let counter = self.next_counter;
        self.next_counter += 1;
        self.lru_index.insert(counter, tag);
        counter
    }

    fn evict_one(&mut self) {
        if let Some((&counter, &tag)) = self.lru_index.iter().next() {
            self.lru_index.remove(&counter);
            self.entries.remove(&tag);
        }
    }
}

/// In-memory segment cache with strict LRU eviction.
///
/// `capacity` is the maximum number of resident segments; `0` means
/// unbounded. Construct with a byte budget via [`MemoryCache::with_byte_limit`]
/// to match the original's "bytes / SEGMENT_LENGTH, minimum 1 if nonzero"
/// sizing rule.
pub struct MemoryCache {
    uuid: Uuid,
    capacity: usize,
    inner: Mutex<MemoryCacheInner>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(uuid: Uuid, capacity: usize) -> Self {
        Self {
            uuid,
            capacity,
            inner: Mutex::new(MemoryCacheInner {
                entries: HashMap::new(),
                lru_index: BTreeMap::new(),
                next_counter: 0,
            }),
        }
    }

    /// Construct a cache sized from a byte budget: `floor(bytes / L)`
    /// entries, minimum 1 if `bytes > 0`.
    #[must_use]
    pub fn with_byte_limit(uuid: Uuid, bytes: usize) -> Self {
        let segment_len = xcodec_proto::SEGMENT_LENGTH;
        let capacity = if bytes == 0 { 0 } else { (bytes / segment_len).max(1) };
        Self::new(uuid, capacity)
    }

    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SegmentBacking for MemoryCache {
    #[allow(clippy::expect_used)]
    fn enter(&self, tag: Tag, segment: Segment) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        if inner.entries.contains_key(&tag) {
            // Same tag entered twice with identical bytes is treated as a
            // no-op touch rather than a hard error: callers (the decoder on
            // EXTRACT) already branch on presence before calling enter.
            let (_, counter) = *inner.entries.get(&tag).expect("checked contains_key");
            let new_counter = inner.touch_counter(tag, counter);
            if let Some(entry) = inner.entries.get_mut(&tag) {
                entry.1 = new_counter;
            }
            return;
        }
        if self.capacity != 0 && inner.entries.len() >= self.capacity {
            inner.evict_one();
        }
        let counter = inner.next_counter;
        inner.next_counter += 1;
        inner.lru_index.insert(counter, tag);
        inner.entries.insert(tag, (segment, counter));
    }

    #[allow(clippy::expect_used)]
    fn replace(&self, tag: Tag, segment: Segment) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let counter = inner.next_counter;
        inner.next_counter += 1;
        if let Some((_, old_counter)) = inner.entries.insert(tag, (segment, counter)) {
            inner.lru_index.remove(&old_counter);
        }
        inner.lru_index.insert(counter, tag);
    }

    #[allow(clippy::expect_used)]
    fn lookup(&self, tag: Tag) -> Option<Segment> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let (segment, counter) = inner.entries.get(&tag).cloned()?;
        let new_counter = inner.touch_counter(tag, counter);
        if let Some(entry) = inner.entries.get_mut(&tag) {
            entry.1 = new_counter;
        }
        Some(segment)
    }

    #[allow(clippy::expect_used)]
    fn touch(&self, tag: Tag) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        if let Some(&(_, counter)) = inner.entries.get(&tag) {
            let new_counter = inner.touch_counter(tag, counter);
            if let Some(entry) = inner.entries.get_mut(&tag) {
                entry.1 = new_counter;
            }
        }
    }

    fn out_of_band(&self) -> bool {
        false
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

/// Tiered cache pairing a fast `primary` with a more persistent
/// `secondary`. Reads promote secondary hits into primary; writes go to
/// both. The pair's namespace is the secondary's, since (per the original
/// design) the lowest tier of cache is the most persistent.
pub struct CachePair<P, S> {
    primary: P,
    secondary: S,
}

impl<P: SegmentBacking, S: SegmentBacking> CachePair<P, S> {
    /// # Panics
    ///
    /// Panics if `primary.out_of_band() != secondary.out_of_band()`: a
    /// tiered cache cannot mix an in-stream-learned tier with an
    /// out-of-band one, since the encoder's EXTRACT-suppression decision
    /// would become ambiguous.
    #[must_use]
    pub fn new(primary: P, secondary: S) -> Self {
        assert_eq!(
            primary.out_of_band(),
            secondary.out_of_band(),
            "tiered cache requires both tiers to agree on out_of_band()"
        );
        Self { primary, secondary }
    }
}

impl<P: SegmentBacking, S: SegmentBacking> SegmentBacking for CachePair<P, S> {
    fn enter(&self, tag: Tag, segment: Segment) {
        self.primary.enter(tag, segment.clone());
        self.secondary.enter(tag, segment);
    }

    fn replace(&self, tag: Tag, segment: Segment) {
        self.primary.replace(tag, segment.clone());
        self.secondary.replace(tag, segment);
    }

    fn lookup(&self, tag: Tag) -> Option<Segment> {
        if let Some(segment) = self.primary.lookup(tag) {
            self.secondary.touch(tag);
            return Some(segment);
        }
        let segment = self.secondary.lookup(tag)?;
        self.primary.enter(tag, segment.clone());
        Some(segment)
    }

    fn touch(&self, tag: Tag) {
        self.primary.touch(tag);
        self.secondary.touch(tag);
    }

    fn out_of_band(&self) -> bool {
        debug_assert_eq!(self.primary.out_of_band(), self.secondary.out_of_band());
        self.secondary.out_of_band()
    }

    fn uuid(&self) -> Uuid {
        self.secondary.uuid()
    }
}

/// Look up `tag` in `cache`, resolving a name collision the way the
/// decoder's `EXTRACT` handling requires: hit-and-equal reuses the cached
/// segment, hit-and-different replaces and warns, miss enters.
pub fn reconcile_extract(cache: &dyn SegmentBacking, tag: Tag, segment: Segment) -> Segment {
    match cache.lookup(tag) {
        Some(existing) if *existing == *segment => existing,
        Some(_) => {
            warn!(%tag, "name reuse in EXTRACT, replacing cached segment");
            cache.replace(tag, segment.clone());
            segment
        }
        None => {
            cache.enter(tag, segment.clone());
            segment
        }
    }
}
