use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use http::{Method, StatusCode, Uri};
use thiserror::Error;

use crate::proxy::connect::{ConnectTarget, parse_connect_target};
use crate::proxy::route::{Route, is_valid_onion_host};

pub const STATUS_PATH: &str = "/status";
pub const PROXY_PATH_PREFIX: &str = "/proxy/";
const DEFAULT_HTTP_PORT: u16 = 80;

/// A request the router refuses before any upstream work starts. Carries the status and the short
/// plain-text explanation sent to the client.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RequestRejected {
    pub status: StatusCode,
    pub message: String,
}

impl RequestRejected {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// How the client addressed the resource, which decides the HTML rewrite applied to onion pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStyle {
    /// `GET http://host/path`, sent by a browser configured to use the proxy.
    Forward,
    /// `GET /proxy/{host}/{path}`, sent to the proxy as if it were an origin server.
    PathBased,
}

impl RequestStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStyle::Forward => "forward",
            RequestStyle::PathBased => "path",
        }
    }
}

/// Normalized plain-HTTP target: lowercase host, explicit port, path plus query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl TargetUrl {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
            path: if path.is_empty() { "/".to_string() } else { path },
        }
    }

    pub fn route(&self) -> Route {
        Route::classify(&self.host)
    }

    /// `host[:port]` as used in URLs and the `Host` header; the port is omitted when it is 80.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == DEFAULT_HTTP_PORT {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}{}", self.authority(), self.path)
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

#[derive(Debug, Clone)]
pub enum RequestShape {
    Status,
    Connect(ConnectTarget),
    Fetch {
        target: TargetUrl,
        style: RequestStyle,
    },
}

/// Cache key for a fetched resource. Forward-style entries use the target URL; path-based entries
/// are keyed by the `/proxy/` form since their bodies carry different link rewrites.
pub fn cache_key(target: &TargetUrl, style: RequestStyle) -> String {
    match style {
        RequestStyle::Forward => target.url(),
        RequestStyle::PathBased => {
            format!("{PROXY_PATH_PREFIX}{}{}", target.authority(), target.path)
        }
    }
}

/// Sorts an inbound request target into one of the accepted shapes. Errors that should reach the
/// client are [`RequestRejected`] values.
pub fn classify_request(
    method: &Method,
    target: &str,
    host_header: Option<&str>,
) -> Result<RequestShape> {
    if target == STATUS_PATH {
        return Ok(RequestShape::Status);
    }

    if method == Method::CONNECT {
        let connect = parse_connect_target(target, host_header).map_err(|err| {
            RequestRejected::new(
                StatusCode::BAD_REQUEST,
                format!("Invalid CONNECT target: {err:#}"),
            )
        })?;
        return Ok(RequestShape::Connect(connect));
    }

    if has_scheme(target, "http") {
        let target = parse_absolute_target(target).map_err(|err| {
            RequestRejected::new(StatusCode::BAD_REQUEST, format!("Invalid request URI: {err:#}"))
        })?;
        if target.route().is_onion() && !is_valid_onion_host(&target.host) {
            return Err(RequestRejected::new(
                StatusCode::BAD_REQUEST,
                "Only .onion addresses are allowed",
            )
            .into());
        }
        return Ok(RequestShape::Fetch {
            target,
            style: RequestStyle::Forward,
        });
    }

    if has_scheme(target, "https") {
        return Err(RequestRejected::new(
            StatusCode::BAD_REQUEST,
            "HTTPS targets must be requested with CONNECT",
        )
        .into());
    }

    if let Some(rest) = target.strip_prefix(PROXY_PATH_PREFIX) {
        return Ok(RequestShape::Fetch {
            target: parse_proxy_path(rest)?,
            style: RequestStyle::PathBased,
        });
    }

    Err(RequestRejected::new(
        StatusCode::NOT_FOUND,
        "Use /proxy/{onion-host}/{path}, an absolute http:// URI, or /status",
    )
    .into())
}

fn has_scheme(target: &str, scheme: &str) -> bool {
    target
        .get(..scheme.len() + 3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(&format!("{scheme}://")))
}

fn parse_absolute_target(target: &str) -> Result<TargetUrl> {
    let uri: Uri = target
        .parse()
        .with_context(|| format!("invalid request target '{target}'"))?;
    let authority = uri
        .authority()
        .map(|auth| auth.as_str())
        .ok_or_else(|| anyhow!("request URI missing host"))?;
    let (host, port) = parse_host_header(authority)?;
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    Ok(TargetUrl::new(host, port.unwrap_or(DEFAULT_HTTP_PORT), path))
}

fn parse_proxy_path(rest: &str) -> Result<TargetUrl> {
    let split = rest.find(['/', '?']).unwrap_or(rest.len());
    let (host, path) = rest.split_at(split);
    let host = host.to_ascii_lowercase();
    if !is_valid_onion_host(&host) {
        return Err(RequestRejected::new(
            StatusCode::BAD_REQUEST,
            "Only .onion addresses are allowed",
        )
        .into());
    }
    let path = if path.starts_with('?') {
        format!("/{path}")
    } else {
        path.to_string()
    };
    Ok(TargetUrl::new(host, DEFAULT_HTTP_PORT, path))
}

/// Return a path with query parameters removed for logging purposes.
pub fn redacted_path(path: &str) -> String {
    path.split('?').next().unwrap_or("/").to_string()
}

/// Parse a Host / authority value into a normalized host + port.
pub fn parse_host_header(value: &str) -> Result<(String, Option<u16>)> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("empty Host header");
    }
    if trimmed.chars().any(|c| c.is_whitespace()) {
        bail!("authority must not contain whitespace");
    }
    if trimmed.contains('@') {
        bail!("authority must not contain userinfo");
    }
    if trimmed.contains(['/', '?', '#', '\\']) {
        bail!("authority must not contain path or query");
    }
    let uri: Uri = format!("http://{trimmed}")
        .parse()
        .with_context(|| format!("invalid Host header '{trimmed}'"))?;
    let host = uri
        .host()
        .ok_or_else(|| anyhow!("Host header missing hostname"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase();
    if host.is_empty() {
        bail!("Host header missing hostname");
    }
    Ok((host, uri.port_u16()))
}
