use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::SelectorId;

/// Bounded memo of selector results, keyed by selector identity.
///
/// An entry is only valid while its version stamp equals the owning store’s version;
/// that is checked on lookup, so nothing is recomputed or removed when the store changes.
/// Eviction is by recency of access alone, regardless of validity.
pub(crate) struct SelectorCache {
    entries: LruCache<SelectorId, CacheEntry>,
}

struct CacheEntry {
    value: Box<dyn Any>,
    version: u64,
}

impl SelectorCache {
    pub(crate) const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(50) {
        Some(capacity) => capacity,
        None => unreachable!(),
    };

    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Returns the cached value for `id` if it was computed at `version`.
    ///
    /// Any entry for `id`, valid or not, becomes the most recently used.
    pub(crate) fn get(&mut self, id: SelectorId, version: u64) -> Option<&dyn Any> {
        match self.entries.get(&id) {
            Some(entry) if entry.version == version => Some(&*entry.value),
            _ => None,
        }
    }

    /// Stores `value` for `id`, stamped with `version`, as the most recently used entry.
    ///
    /// Returns the identity of the entry evicted to make room, if any.
    pub(crate) fn insert(
        &mut self,
        id: SelectorId,
        value: Box<dyn Any>,
        version: u64,
    ) -> Option<SelectorId> {
        match self.entries.push(id, CacheEntry { value, version }) {
            Some((evicted, _)) if evicted != id => Some(evicted),
            _ => None,
        }
    }

    /// Checks for an entry without affecting recency.
    #[cfg(test)]
    pub(crate) fn contains(&self, id: SelectorId) -> bool {
        self.entries.contains(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn capacity(&self) -> NonZeroUsize {
        self.entries.cap()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for SelectorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SelectorCache({}/{})", self.len(), self.capacity())
    }
}

// -------------------------------------------------------------------------------------------------
