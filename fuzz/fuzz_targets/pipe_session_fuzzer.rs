//! Fuzz target for `PipeSession::receive_wire`.
//!
//! Drives a session through its own `start()` HELLO, then feeds arbitrary
//! bytes as if they had arrived from a hostile peer. The only invariant
//! under test is that a malformed wire never panics: either the session
//! keeps requesting more bytes, reports delivered application data, or
//! fails cleanly via `PipeAction::Fail`.

#![no_main]

use std::sync::{Arc, Mutex};

use libfuzzer_sys::fuzz_target;
use uuid::Uuid;
use xcodec_core::{MemoryCache, SegmentBacking};
use xcodec_pipe::{CacheProvider, PipeAction, PipeSession};

struct SingleCache(Mutex<Option<Arc<dyn SegmentBacking>>>);

impl CacheProvider for SingleCache {
    fn resolve(&self, uuid: Uuid) -> Arc<dyn SegmentBacking> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_or_insert_with(|| Arc::new(MemoryCache::new(uuid, 64)))
            .clone()
    }
}

fuzz_target!(|data: &[u8]| {
    let provider: Arc<dyn CacheProvider> = Arc::new(SingleCache(Mutex::new(None)));
    let mut session = PipeSession::new(Uuid::from_u128(1), provider, 32);

    for action in session.start() {
        if matches!(action, PipeAction::Fail(_)) {
            return;
        }
    }

    for action in session.receive_wire(data) {
        if matches!(action, PipeAction::Fail(_) | PipeAction::Complete) {
            return;
        }
    }
});
