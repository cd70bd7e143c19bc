use std::num::NonZeroUsize;

use lru::LruCache;

use super::CacheEntry;

#[derive(Debug)]
pub(super) struct CacheIndex {
    lru: LruCache<String, CacheEntry>,
    bytes_in_use: u64,
    max_bytes: u64,
}

impl CacheIndex {
    pub(super) fn new(capacity: NonZeroUsize, max_bytes: u64) -> Self {
        Self {
            lru: LruCache::new(capacity),
            bytes_in_use: 0,
            max_bytes,
        }
    }

    /// Looks up `key` and bumps its recency.
    pub(super) fn get(&mut self, key: &str) -> Option<&CacheEntry> {
        self.lru.get(key)
    }

    pub(super) fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.lru.pop(key)?;
        self.bytes_in_use = self.bytes_in_use.saturating_sub(removed.size);
        Some(removed)
    }

    /// Inserts `entry` as most recently used and returns the number of entries evicted to get
    /// back under the entry and byte ceilings. A replaced entry for the same key is not counted.
    pub(super) fn insert(&mut self, key: String, entry: CacheEntry) -> usize {
        let mut evicted = 0;

        self.bytes_in_use = self.bytes_in_use.saturating_add(entry.size);

        if let Some((old_key, removed)) = self.lru.push(key.clone(), entry) {
            self.bytes_in_use = self.bytes_in_use.saturating_sub(removed.size);
            if old_key != key {
                evicted += 1;
            }
        }

        while self.bytes_in_use > self.max_bytes {
            if let Some((_key, removed)) = self.lru.pop_lru() {
                self.bytes_in_use = self.bytes_in_use.saturating_sub(removed.size);
                evicted += 1;
            } else {
                break;
            }
        }

        evicted
    }

    pub(super) fn bytes_in_use(&self) -> u64 {
        self.bytes_in_use
    }

    pub(super) fn len(&self) -> usize {
        self.lru.len()
    }

    #[cfg(test)]
    pub(super) fn contains(&self, key: &str) -> bool {
        self.lru.contains(key)
    }
}
