//! Conversion cache
//!
//! Remembers the IR produced for each source file together with the
//! fingerprint of the bytes it was produced from. A lookup with the current
//! bytes' fingerprint skips the converter when the file is unchanged.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::trace;

use irsync_core::domain::{Fingerprint, IrDocument};

struct CacheEntry {
    source: Fingerprint,
    ir: IrDocument,
    last_used: u64,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Per-file IR memo, bounded by least-recent use
pub struct ConversionCache {
    entries: DashMap<PathBuf, CacheEntry>,
    max_entries: usize,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ConversionCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// IR cached for `path` if it was produced from bytes with `source`
    pub fn get(&self, path: &Path, source: &Fingerprint) -> Option<IrDocument> {
        if let Some(mut entry) = self.entries.get_mut(path) {
            if entry.source == *source {
                entry.last_used = self.next_tick();
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(path = %path.display(), "conversion cache hit");
                return Some(entry.ir.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores `ir` for `path`, evicting the least recently used entry if full
    pub fn insert(&self, path: PathBuf, source: Fingerprint, ir: IrDocument) {
        let entry = CacheEntry {
            source,
            ir,
            last_used: self.next_tick(),
        };
        self.entries.insert(path, entry);

        while self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.last_used)
                .map(|e| e.key().clone());
            let Some(oldest) = oldest else {
                break;
            };
            self.entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drops the entry for `path`; returns true if there was one
    pub fn invalidate(&self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hit_requires_matching_fingerprint() {
        let cache = ConversionCache::new(10);
        let path = PathBuf::from("/w/App.tsx");
        let v1 = Fingerprint::of_bytes(b"one");
        cache.insert(path.clone(), v1.clone(), json!({"n": 1}));

        assert_eq!(cache.get(&path, &v1), Some(json!({"n": 1})));
        assert_eq!(cache.get(&path, &Fingerprint::of_bytes(b"two")), None);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = ConversionCache::new(2);
        let fp = Fingerprint::of_bytes(b"x");
        cache.insert(PathBuf::from("/a"), fp.clone(), json!(1));
        cache.insert(PathBuf::from("/b"), fp.clone(), json!(2));
        assert!(cache.get(Path::new("/a"), &fp).is_some());

        cache.insert(PathBuf::from("/c"), fp.clone(), json!(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(Path::new("/b"), &fp).is_none());
        assert!(cache.get(Path::new("/a"), &fp).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate() {
        let cache = ConversionCache::new(4);
        let fp = Fingerprint::of_bytes(b"x");
        cache.insert(PathBuf::from("/a"), fp.clone(), json!(1));
        assert!(cache.invalidate(Path::new("/a")));
        assert!(!cache.invalidate(Path::new("/a")));
        assert!(cache.is_empty());
    }
}
