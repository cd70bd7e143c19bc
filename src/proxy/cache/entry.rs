use bytes::Bytes;
use http::StatusCode;
use tokio::time::Instant;

use super::CachedResponse;

#[derive(Debug, Clone)]
pub(super) struct CacheEntry {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub expires_at: Instant,
    pub size: u64,
}

impl CacheEntry {
    pub(super) fn new(
        key: &str,
        status: StatusCode,
        headers: Vec<(String, String)>,
        body: Bytes,
        expires_at: Instant,
    ) -> Self {
        let size = entry_size(key, &headers, &body);
        Self {
            status,
            headers,
            body,
            expires_at,
            size,
        }
    }

    pub(super) fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub(super) fn to_response(&self) -> CachedResponse {
        CachedResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Resident cost of an entry: key, header names and values, and body.
pub(super) fn entry_size(key: &str, headers: &[(String, String)], body: &[u8]) -> u64 {
    let header_bytes: usize = headers
        .iter()
        .map(|(name, value)| name.len() + value.len())
        .sum();
    (key.len() + header_bytes + body.len()) as u64
}
