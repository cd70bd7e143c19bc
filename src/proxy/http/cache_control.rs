use std::time::Duration;

use http::{Method, StatusCode};

use crate::proxy::headers::header_value;

const MAX_TTL: Duration = Duration::from_secs(3600);
const STATIC_ASSET_TTL: Duration = Duration::from_secs(600);
const HTML_TTL: Duration = Duration::from_secs(30);
const JSON_TTL: Duration = Duration::from_secs(60);
const DEFAULT_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub private: bool,
    pub no_store: bool,
    pub max_age: Option<Duration>,
}

pub fn parse_cache_control(headers: &[(String, String)]) -> CacheControl {
    let mut cc = CacheControl::default();

    for (_, value) in headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("cache-control"))
    {
        for part in value.split(',') {
            let part = part.trim();
            if part.eq_ignore_ascii_case("private") {
                cc.private = true;
            } else if part.eq_ignore_ascii_case("no-store") {
                cc.no_store = true;
            } else if let Some((key, secs)) = part.split_once('=')
                && key.trim().eq_ignore_ascii_case("max-age")
                && let Ok(secs) = secs.trim().trim_matches('"').parse::<u64>()
            {
                cc.max_age = Some(Duration::from_secs(secs));
            }
        }
    }
    cc
}

/// Lifetime a response may stay cached. Zero means "do not cache".
pub fn ttl_for(headers: &[(String, String)]) -> Duration {
    let cc = parse_cache_control(headers);
    if cc.no_store || cc.private {
        return Duration::ZERO;
    }
    if let Some(max_age) = cc.max_age {
        return max_age.min(MAX_TTL);
    }
    let content_type = header_value(headers, "content-type")
        .unwrap_or_default()
        .to_ascii_lowercase();
    ttl_for_content_type(&content_type)
}

fn ttl_for_content_type(content_type: &str) -> Duration {
    if content_type.starts_with("image/")
        || content_type.starts_with("font/")
        || content_type.contains("javascript")
        || content_type.contains("css")
        || content_type.contains("wasm")
        || content_type.contains("svg")
    {
        STATIC_ASSET_TTL
    } else if content_type.contains("text/html") {
        HTML_TTL
    } else if content_type.contains("json") {
        JSON_TTL
    } else {
        DEFAULT_TTL
    }
}

/// Only successful or redirecting `GET` responses are ever stored.
pub fn is_cacheable(method: &Method, status: StatusCode) -> bool {
    method == Method::GET && (200..400).contains(&status.as_u16())
}
