//! An explicit, caller-owned header cache.
//!
//! The original implementation kept a single process-wide dict keyed by
//! file name, toggled by a global `CACHE_HEADERS` flag. Per the design
//! notes this is respecified as a plain value: construct one, share it
//! (behind an `Arc` if multiple threads need it), and pass it to the
//! operations that should consult it. No cache, no caching -- there is no
//! implicit global to forget to disable.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::trace;
use lru::LruCache;

use crate::whisper::header::Header;

const DEFAULT_CAPACITY: usize = 128;

pub struct HeaderCache {
    entries: Mutex<LruCache<PathBuf, Header>>,
}

impl HeaderCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
        HeaderCache {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, path: &Path) -> Option<Header> {
        let mut entries = self.entries.lock().expect("header cache mutex poisoned");
        let hit = entries.get(path).cloned();
        trace!("header cache {} for {}", if hit.is_some() { "hit" } else { "miss" }, path.display());
        hit
    }

    pub fn put(&self, path: &Path, header: Header) {
        self.entries
            .lock()
            .expect("header cache mutex poisoned")
            .put(path.to_path_buf(), header);
    }

    /// Must be called by any operation that rewrites a file's metadata
    /// (aggregation method / xFilesFactor) or replaces the file outright.
    pub fn invalidate(&self, path: &Path) {
        trace!("header cache evicting {}", path.display());
        self.entries
            .lock()
            .expect("header cache mutex poisoned")
            .pop(path);
    }
}

impl Default for HeaderCache {
    fn default() -> Self {
        HeaderCache::new(DEFAULT_CAPACITY)
    }
}
