use std::net::SocketAddr;

use anyhow::{Context, Result};
use http::Method;
use serde::Deserialize;
use tracing::debug;

use crate::proxy::upstream::{UpstreamUnreachable, connect_to_addrs};
use crate::settings::Settings;

use super::exchange::{OutboundRequest, send_and_receive, with_exchange_deadline};
use super::{DEFAULT_POST_CONTENT_TYPE, FetchLimits, FetchRequest, FetchedResponse};

const STATUS_ACTION_HEADER: &str = "X-OnionPress-Action";

#[derive(Debug, Deserialize)]
struct BridgeStatus {
    #[serde(default)]
    ok: bool,
}

/// Fetches onion URLs through the local bridge, which relays to the anonymity network. The bridge
/// receives the real URL in a header and the client's method, body and content type. One request
/// per fetch, no retries.
#[derive(Debug, Clone)]
pub struct OnionFetcher {
    bridge_addr: SocketAddr,
    bridge_path: String,
    url_header: String,
    limits: FetchLimits,
}

impl OnionFetcher {
    pub fn new(settings: &Settings) -> Self {
        Self {
            bridge_addr: settings.bridge_addr,
            bridge_path: settings.bridge_path.clone(),
            url_header: settings.bridge_url_header.clone(),
            limits: FetchLimits::from_settings(settings),
        }
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchedResponse> {
        let url = request.target.url();
        let mut headers = vec![(self.url_header.clone(), url.clone())];
        if request.method == Method::POST {
            let content_type = request
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_POST_CONTENT_TYPE.to_string());
            headers.push(("Content-Type".to_string(), content_type));
        }

        debug!(bridge = %self.bridge_addr, url = %url, method = %request.method, "fetching via bridge");
        self.call(&request.method, &headers, request.body.as_deref(), &url)
            .await
            .with_context(|| format!("bridge fetch of {url} failed"))
    }

    /// Asks the bridge whether it is ready. Answers other than `{"ok": true}` count as not ready.
    pub async fn probe(&self) -> Result<bool> {
        let headers = vec![(STATUS_ACTION_HEADER.to_string(), "status".to_string())];
        let response = self
            .call(&Method::GET, &headers, None, &self.bridge_path)
            .await?;
        if !response.status.is_success() {
            return Ok(false);
        }
        let status: BridgeStatus = match serde_json::from_slice(&response.body) {
            Ok(status) => status,
            Err(err) => {
                debug!(error = %err, "bridge status response is not JSON");
                return Ok(false);
            }
        };
        Ok(status.ok)
    }

    pub fn bridge_addr(&self) -> SocketAddr {
        self.bridge_addr
    }

    async fn call(
        &self,
        method: &Method,
        headers: &[(String, String)],
        body: Option<&[u8]>,
        target: &str,
    ) -> Result<FetchedResponse> {
        let host = self.bridge_addr.to_string();
        let outbound = OutboundRequest {
            method,
            path: &self.bridge_path,
            host: &host,
            headers,
            body,
        };
        with_exchange_deadline(&self.limits, target, async {
            let (stream, peer) = connect_to_addrs(&[self.bridge_addr], self.limits.connect_timeout)
                .await
                .with_context(|| UpstreamUnreachable {
                    target: self.bridge_addr.to_string(),
                })?;
            send_and_receive(stream, peer, &outbound, &self.limits).await
        })
        .await
    }
}
