use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

mod entry;
mod index;

use entry::{CacheEntry, entry_size};
use index::CacheIndex;

/// Entries larger than `max_bytes / OVERSIZE_DIVISOR` are never stored.
const OVERSIZE_DIVISOR: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    SkippedZeroTtl,
    SkippedTooLarge,
}

impl StoreOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOutcome::Stored => "stored",
            StoreOutcome::SkippedZeroTtl | StoreOutcome::SkippedTooLarge => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
}

/// In-memory response cache bounded by entry count and resident bytes.
#[derive(Clone)]
pub struct ResponseCache {
    state: Arc<CacheState>,
}

#[derive(Debug)]
struct CacheState {
    index: Mutex<CacheIndex>,
    max_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(max_entries: usize, max_bytes: u64) -> Result<Self> {
        let capacity = NonZeroUsize::new(max_entries)
            .ok_or_else(|| anyhow!("cache capacity must be greater than zero"))?;
        Ok(Self {
            state: Arc::new(CacheState {
                index: Mutex::new(CacheIndex::new(capacity, max_bytes)),
                max_bytes,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        })
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = Instant::now();
        let found = {
            let mut guard = self.state.index.lock();
            let hit = guard
                .get(key)
                .map(|entry| (entry.is_expired(now), entry.to_response()));
            match hit {
                Some((true, _)) => {
                    trace!(key, "cache entry expired");
                    guard.remove(key);
                    None
                }
                Some((false, response)) => Some(response),
                None => None,
            }
        };

        if found.is_some() {
            self.state.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.state.misses.fetch_add(1, Ordering::Relaxed);
        }
        crate::metrics::record_cache_lookup(found.is_some());
        found
    }

    pub fn put(
        &self,
        key: &str,
        status: StatusCode,
        headers: Vec<(String, String)>,
        body: Bytes,
        ttl: Duration,
    ) -> StoreOutcome {
        if ttl.is_zero() {
            return StoreOutcome::SkippedZeroTtl;
        }
        let size = entry_size(key, &headers, &body);
        if size > self.state.max_bytes / OVERSIZE_DIVISOR {
            trace!(key, size, "cache entry exceeds per-entry limit");
            crate::metrics::record_cache_oversize();
            return StoreOutcome::SkippedTooLarge;
        }

        let entry = CacheEntry::new(key, status, headers, body, Instant::now() + ttl);
        let evicted = {
            let mut guard = self.state.index.lock();
            guard.insert(key.to_string(), entry)
        };
        crate::metrics::record_cache_store();
        crate::metrics::record_cache_evictions(evicted);
        StoreOutcome::Stored
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let guard = self.state.index.lock();
            (guard.len(), guard.bytes_in_use())
        };
        CacheStats {
            entries,
            bytes,
            hits: self.state.hits.load(Ordering::Relaxed),
            misses: self.state.misses.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn contains(&self, key: &str) -> bool {
        self.state.index.lock().contains(key)
    }
}
