mod clearnet;
mod exchange;
mod onion;

use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use thiserror::Error;

use crate::proxy::request::TargetUrl;
use crate::settings::Settings;

pub use clearnet::ClearnetFetcher;
pub use onion::OnionFetcher;

/// Content type the bridge receives for a POST whose client did not name one.
pub const DEFAULT_POST_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Error)]
#[error("upstream {target} did not answer within {timeout:?}")]
pub struct UpstreamTimeout {
    pub target: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub target: TargetUrl,
    pub body: Option<Bytes>,
    pub content_type: Option<String>,
    /// Client request headers eligible for forwarding. Only the clearnet fetcher sends them.
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    /// Lowercase names, upstream order, framing headers removed.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub redirects: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub connect_timeout: Duration,
    /// Bound on one complete exchange: connect, request, response head and body.
    pub exchange_timeout: Duration,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl FetchLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            connect_timeout: settings.upstream_connect_timeout(),
            exchange_timeout: settings.upstream_timeout(),
            max_header_bytes: settings.max_response_header_size,
            max_body_bytes: settings.max_response_body_size,
        }
    }
}

#[cfg(feature = "fuzzing")]
pub mod fuzzing {
    use std::net::SocketAddr;
    use std::time::Duration;

    use anyhow::Result;
    use http::Method;
    use tokio::io::AsyncRead;

    use super::FetchLimits;

    /// Runs the response half of an upstream exchange over arbitrary bytes.
    pub async fn read_upstream_response<S>(stream: S, max_body_bytes: usize) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        let peer: SocketAddr = "127.0.0.1:8080".parse()?;
        let limits = FetchLimits {
            connect_timeout: Duration::from_millis(50),
            exchange_timeout: Duration::from_millis(50),
            max_header_bytes: 8 * 1024,
            max_body_bytes,
        };
        let _ = super::exchange::read_response(stream, peer, &Method::GET, &limits).await?;
        Ok(())
    }
}
