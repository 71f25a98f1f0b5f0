//! Position cache: raw record bytes by position.
//!
//! Entries are validated by presence only; every mutation of a position
//! invalidates its entry explicitly.

use std::num::NonZeroUsize;

use lru::LruCache;

/// Raw encoding of one record plus the position right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CacheEntry {
    pub(crate) bytes: Vec<u8>,
    pub(crate) next_position: u64,
}

impl CacheEntry {
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug)]
pub(crate) struct PositionCache {
    /// `None` when caching is disabled.
    lru: Option<LruCache<u64, CacheEntry>>,
}

impl PositionCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            lru: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    #[inline]
    pub(crate) fn is_enabled(&self) -> bool {
        self.lru.is_some()
    }

    pub(crate) fn get(&mut self, pos: u64) -> Option<&CacheEntry> {
        self.lru.as_mut().and_then(|c| c.get(&pos))
    }

    pub(crate) fn put(&mut self, pos: u64, entry: CacheEntry) {
        if let Some(c) = self.lru.as_mut() {
            c.put(pos, entry);
        }
    }

    pub(crate) fn invalidate(&mut self, pos: u64) {
        if let Some(c) = self.lru.as_mut() {
            c.pop(&pos);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lru.as_ref().map_or(0, |c| c.len())
    }
}
