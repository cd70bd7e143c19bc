use serde::Serialize;

use crate::proxy::cache::CacheStats;
use crate::proxy::StatusInfo;
use crate::util::bytes_to_mib;

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub running: bool,
    pub proxy_port: u16,
    pub onion_address: Option<String>,
    pub version: String,
    pub cache: CacheSummary,
}

#[derive(Debug, Serialize)]
pub struct CacheSummary {
    pub entries: usize,
    pub size_mb: f64,
    pub hits: u64,
    pub misses: u64,
}

impl StatusBody {
    pub fn new(proxy_port: u16, info: StatusInfo, stats: CacheStats) -> Self {
        Self {
            running: true,
            proxy_port,
            onion_address: info.onion_address,
            version: info.version,
            cache: CacheSummary {
                entries: stats.entries,
                size_mb: bytes_to_mib(stats.bytes),
                hits: stats.hits,
                misses: stats.misses,
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
