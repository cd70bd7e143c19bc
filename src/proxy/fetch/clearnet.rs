use anyhow::{Context, Result};
use http::{Method, StatusCode};
use tracing::debug;
use url::{Host, Url};

use crate::metrics;
use crate::proxy::headers::header_value;
use crate::proxy::request::TargetUrl;
use crate::proxy::route::Route;
use crate::proxy::upstream::connect_host;
use crate::settings::Settings;

use super::exchange::{OutboundRequest, send_and_receive, with_exchange_deadline};
use super::{FetchLimits, FetchRequest, FetchedResponse};

/// Direct plain-HTTP fetcher for non-onion hosts. Follows a bounded number of redirects as long
/// as they stay on plain HTTP and off the onion network; anything else goes back to the client.
#[derive(Debug, Clone)]
pub struct ClearnetFetcher {
    limits: FetchLimits,
    max_redirects: usize,
}

impl ClearnetFetcher {
    pub fn new(settings: &Settings) -> Self {
        Self {
            limits: FetchLimits::from_settings(settings),
            max_redirects: settings.max_redirects,
        }
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchedResponse> {
        let mut target = request.target.clone();
        let mut method = request.method.clone();
        let mut body = request.body.clone();
        let mut content_type = request.content_type.clone();
        let mut redirects = 0usize;

        loop {
            let mut response = self
                .fetch_once(
                    &method,
                    &target,
                    body.as_deref(),
                    content_type.as_deref(),
                    &request.headers,
                )
                .await
                .with_context(|| format!("direct fetch of {target} failed"))?;

            let next = if is_followed_redirect(response.status) && redirects < self.max_redirects {
                header_value(&response.headers, "location")
                    .and_then(|location| resolve_redirect(&target, location))
            } else {
                None
            };

            let Some(next) = next else {
                if redirects > 0 {
                    absolutize_location(&mut response.headers, &target);
                }
                metrics::record_redirects(redirects);
                response.redirects = redirects;
                return Ok(response);
            };

            debug!(from = %target, to = %next, status = response.status.as_u16(), "following redirect");
            if rewrites_to_get(response.status, &method) {
                method = Method::GET;
                body = None;
                content_type = None;
            }
            target = next;
            redirects += 1;
        }
    }

    async fn fetch_once(
        &self,
        method: &Method,
        target: &TargetUrl,
        body: Option<&[u8]>,
        content_type: Option<&str>,
        forwarded: &[(String, String)],
    ) -> Result<FetchedResponse> {
        let mut headers = forwarded.to_vec();
        if let Some(content_type) = content_type {
            headers.push(("Content-Type".to_string(), content_type.to_string()));
        }
        let host = target.authority();
        let outbound = OutboundRequest {
            method,
            path: &target.path,
            host: &host,
            headers: &headers,
            body,
        };
        let url = target.url();
        with_exchange_deadline(&self.limits, &url, async {
            let (stream, peer) =
                connect_host(&target.host, target.port, self.limits.connect_timeout).await?;
            send_and_receive(stream, peer, &outbound, &self.limits).await
        })
        .await
    }
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// 303 always continues as GET; 301 and 302 do so for POST, as browsers do.
fn rewrites_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => method == Method::POST,
        _ => false,
    }
}

/// A `Location` returned after followed hops is relative to the last hop, not to the URL the
/// client asked for, so it is made absolute before it leaves the proxy.
fn absolutize_location(headers: &mut [(String, String)], last: &TargetUrl) {
    let Ok(base) = Url::parse(&last.url()) else {
        return;
    };
    for (name, value) in headers.iter_mut() {
        if !name.eq_ignore_ascii_case("location") {
            continue;
        }
        if let Ok(resolved) = base.join(value.trim()) {
            *value = resolved.to_string();
        }
    }
}

/// Resolves `location` against the current target. Returns `None` for targets that must not be
/// followed: non-HTTP schemes (HTTPS included), onion hosts and unparsable values.
fn resolve_redirect(current: &TargetUrl, location: &str) -> Option<TargetUrl> {
    let base = Url::parse(&current.url()).ok()?;
    let next = base.join(location.trim()).ok()?;
    if next.scheme() != "http" {
        return None;
    }
    let host = match next.host()? {
        Host::Domain(domain) => domain.to_string(),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    };
    if Route::classify(&host).is_onion() {
        return None;
    }
    let port = next.port_or_known_default().unwrap_or(80);
    let mut path = next.path().to_string();
    if let Some(query) = next.query() {
        path.push('?');
        path.push_str(query);
    }
    Some(TargetUrl::new(host, port, path))
}
