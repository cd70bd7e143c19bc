use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;

use super::upstream::{RecordedRequest, TestUpstream, build_response};

pub const URL_HEADER: &str = "X-OnionPress-URL";

/// Stand-in for the companion bridge: answers by the onion URL carried in the URL header and
/// records every request it sees.
pub struct MockBridge {
    upstream: TestUpstream,
}

impl MockBridge {
    /// Every URL gets the same HTML page.
    pub async fn html(body: &str) -> Result<Self> {
        let response = build_response(
            "200 OK",
            &[("Content-Type", "text/html; charset=utf-8")],
            body.as_bytes(),
        );
        Self::respond_with(move |_| response.clone()).await
    }

    /// Full responses keyed by onion URL. Unknown URLs get a 404.
    pub async fn pages(pages: Vec<(String, Vec<u8>)>) -> Result<Self> {
        let pages: Arc<HashMap<String, Vec<u8>>> = Arc::new(pages.into_iter().collect());
        Self::respond_with(move |request| {
            request
                .header(URL_HEADER)
                .and_then(|url| pages.get(url).cloned())
                .unwrap_or_else(|| build_response("404 Not Found", &[], b"no such page"))
        })
        .await
    }

    pub async fn respond_with<F>(responder: F) -> Result<Self>
    where
        F: Fn(&RecordedRequest) -> Vec<u8> + Send + Sync + 'static,
    {
        let upstream = TestUpstream::respond_with(move |request| {
            if request.header("X-OnionPress-Action") == Some("status") {
                return build_response(
                    "200 OK",
                    &[("Content-Type", "application/json")],
                    br#"{"ok":true}"#,
                );
            }
            responder(request)
        })
        .await?;
        Ok(Self { upstream })
    }

    pub fn addr(&self) -> SocketAddr {
        self.upstream.addr()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.upstream
            .requests()
            .into_iter()
            .filter(|request| request.header(URL_HEADER).is_some())
            .collect()
    }

    pub fn url_headers(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|request| request.header(URL_HEADER).map(str::to_string))
            .collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.requests().len()
    }
}
