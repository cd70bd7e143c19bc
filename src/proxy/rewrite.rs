//! Link rewriting for onion-origin HTML.
//!
//! Forward-proxy clients only need `https://` onion links turned into `http://` so the browser
//! sends them back through the proxy instead of opening a tunnel. Path-based clients need every
//! onion URL and root-relative reference mapped into the `/proxy/{host}` namespace.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::request::PROXY_PATH_PREFIX;

static HTTPS_ONION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https://((?:[a-z0-9-]+\.)*[a-z0-9]{16,56}\.onion)")
        .expect("valid https onion pattern")
});

static ONION_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(https?://)((?:[a-z0-9-]+\.)*[a-z0-9]{16,56}\.onion)((?:/[^\s"'<>]*)?)"#)
        .expect("valid onion url pattern")
});

static ROOT_RELATIVE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)((?:src|href|action|srcset)\s*=\s*["'])(/[^"']*)"#)
        .expect("valid root-relative attribute pattern")
});

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(url\(\s*["']?)(/[^"')\s]+)"#).expect("valid css url pattern")
});

/// True when a response body should go through the rewriter: non-empty HTML that is not
/// content-encoded.
pub fn should_rewrite(
    content_type: Option<&str>,
    content_encoding: Option<&str>,
    body: &[u8],
) -> bool {
    if body.is_empty() {
        return false;
    }
    let is_html = content_type
        .map(|value| value.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(false);
    if !is_html {
        return false;
    }
    match content_encoding.map(str::trim) {
        None | Some("") => true,
        Some(encoding) => encoding.eq_ignore_ascii_case("identity"),
    }
}

pub fn downgrade_onion_links(body: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(body);
    downgrade_text(&text).into_owned().into_bytes()
}

pub fn rewrite_onion_paths(body: &[u8], current_host: &str) -> Vec<u8> {
    let text = String::from_utf8_lossy(body);
    rewrite_paths_text(&text, current_host).into_bytes()
}

/// Applies the same mapping to a redirect target so 3xx responses stay inside the proxy.
pub fn rewrite_location(location: &str, current_host: &str, path_based: bool) -> String {
    if !path_based {
        return downgrade_text(location).into_owned();
    }
    if needs_proxy_prefix(location) {
        return format!("{PROXY_PATH_PREFIX}{current_host}{location}");
    }
    rewrite_absolute(location).into_owned()
}

fn downgrade_text(text: &str) -> Cow<'_, str> {
    HTTPS_ONION.replace_all(text, "http://$1")
}

fn rewrite_paths_text(text: &str, current_host: &str) -> String {
    let prefix = format!("{PROXY_PATH_PREFIX}{current_host}");
    let text = rewrite_absolute(text);

    let text = ROOT_RELATIVE_ATTR.replace_all(&text, |caps: &Captures| {
        prefix_root_relative(caps, &prefix)
    });
    let text = CSS_URL.replace_all(&text, |caps: &Captures| prefix_root_relative(caps, &prefix));
    text.into_owned()
}

/// Absolute onion URLs become `/proxy/{host}{path}`. Onion URLs nested inside the captured
/// path (query parameters, mostly) are rewritten too, otherwise a second pass would find them.
fn rewrite_absolute(text: &str) -> Cow<'_, str> {
    ONION_URL.replace_all(text, |caps: &Captures| {
        let host = &caps[2];
        let path = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        format!("{PROXY_PATH_PREFIX}{host}{}", rewrite_absolute(path))
    })
}

fn prefix_root_relative(caps: &Captures, prefix: &str) -> String {
    let lead = &caps[1];
    let value = &caps[2];
    if needs_proxy_prefix(value) {
        format!("{lead}{prefix}{value}")
    } else {
        format!("{lead}{value}")
    }
}

/// Single-slash paths outside `/proxy/`. Protocol-relative `//host` references are left alone.
fn needs_proxy_prefix(value: &str) -> bool {
    if !value.starts_with('/') || value.starts_with("//") {
        return false;
    }
    let already_proxied = value
        .get(..PROXY_PATH_PREFIX.len())
        .map(|head| head.eq_ignore_ascii_case(PROXY_PATH_PREFIX))
        .unwrap_or(false);
    !already_proxied
}
