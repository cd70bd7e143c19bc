use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use http::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::debug;

use crate::logging::AccessLogBuilder;
use crate::metrics;
use crate::proxy::AppContext;
use crate::proxy::cache::CachedResponse;
use crate::proxy::fetch::{FetchRequest, FetchedResponse};
use crate::proxy::forward_error::{ForwardErrorKind, classify_forward_error, log_forward_error};
use crate::proxy::headers::{CLEARNET_REQUEST_HEADERS, filter_response_headers, header_value};
use crate::proxy::request::{RequestStyle, TargetUrl, cache_key};
use crate::proxy::rewrite::{
    downgrade_onion_links, rewrite_location, rewrite_onion_paths, should_rewrite,
};
use crate::proxy::route::Route;
use crate::proxy::status::StatusBody;

use super::body::{BodySide, BodySizeTracker, read_fixed_body};
use super::cache_control::{is_cacheable, ttl_for};
use super::codec::Http1RequestHead;
use super::respond::{respond_with_access_log, shutdown_stream, write_response};

/// Whether the connection may carry another request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ClientDisposition {
    Continue,
    Close,
}

pub(super) struct FetchContext<'a> {
    pub peer: SocketAddr,
    pub head: &'a Http1RequestHead,
    pub target: TargetUrl,
    pub style: RequestStyle,
    pub log: AccessLogBuilder,
    pub start: Instant,
}

struct Outgoing<'a> {
    status: StatusCode,
    headers: &'a [(String, String)],
    body: &'a [u8],
    content_length: u64,
}

pub(super) async fn handle_status<S>(
    reader: &mut BufReader<S>,
    head: &Http1RequestHead,
    proxy_port: u16,
    app: &AppContext,
    log: AccessLogBuilder,
    start: Instant,
) -> Result<ClientDisposition>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let body = StatusBody::new(proxy_port, app.status.snapshot(), app.cache.stats()).to_json()?;
    let headers = [(
        "Content-Type".to_string(),
        "application/json".to_string(),
    )];
    // A body on /status is never read, so the connection cannot be reused after it.
    let declares_body =
        head.headers.is_chunked() || head.headers.content_length().unwrap_or(0) > 0;
    let response = Outgoing {
        status: StatusCode::OK,
        headers: &headers,
        body: &body,
        content_length: body.len() as u64,
    };
    finish(
        reader.get_mut(),
        head,
        response,
        declares_body,
        app.settings.client_timeout(),
        head.total_bytes(),
        log.route("status"),
        start,
    )
    .await
}

/// Serves a GET, HEAD or POST for an onion or clearnet resource, through the cache when allowed.
pub(super) async fn handle_fetch<S>(
    reader: &mut BufReader<S>,
    ctx: FetchContext<'_>,
    app: &AppContext,
) -> Result<ClientDisposition>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let FetchContext {
        peer,
        head,
        target,
        style,
        log,
        start,
    } = ctx;
    let client_timeout = app.settings.client_timeout();
    let route = target.route();
    let method = head.method.clone();
    let mut request_bytes = head.total_bytes();
    let log = log
        .route(route.as_str())
        .style(style.as_str())
        .host(target.host.clone());

    if head.headers.is_chunked() {
        respond_with_access_log(
            reader.get_mut(),
            StatusCode::LENGTH_REQUIRED,
            "Chunked request bodies are not supported; send Content-Length",
            client_timeout,
            request_bytes,
            log.error_reason("chunked_request"),
            start.elapsed(),
        )
        .await?;
        return Ok(ClientDisposition::Close);
    }

    let mut body = None;
    if let Some(length) = head.headers.content_length().filter(|length| *length > 0) {
        let mut tracker =
            BodySizeTracker::new(BodySide::Request, app.settings.max_request_body_size);
        match read_fixed_body(reader, length, client_timeout, peer, &mut tracker).await {
            Ok(bytes) => {
                request_bytes += bytes.len() as u64;
                body = Some(Bytes::from(bytes));
            }
            Err(err) => {
                let kind = classify_forward_error(&err);
                if !matches!(kind, ForwardErrorKind::RequestBodyTooLarge(_)) {
                    return Err(err);
                }
                metrics::record_upstream_error(kind.label());
                respond_with_access_log(
                    reader.get_mut(),
                    kind.status(),
                    &kind.client_message(route.is_onion()),
                    client_timeout,
                    request_bytes,
                    log.error_reason(kind.label()),
                    start.elapsed(),
                )
                .await?;
                return Ok(ClientDisposition::Close);
            }
        }
    }
    // Bodies sent with GET or HEAD are drained above and dropped here.
    let body = if method == Method::POST { body } else { None };

    let key = cache_key(&target, style);
    let log = if method == Method::GET {
        if let Some(cached) = app.cache.get(&key) {
            debug!(peer = %peer, key = %key, "serving from cache");
            return serve_cached(reader, head, cached, client_timeout, request_bytes, log, start)
                .await;
        }
        log.cache_lookup("miss")
    } else {
        log.cache_lookup("bypass")
    };

    let request = FetchRequest {
        method: method.clone(),
        target: target.clone(),
        body,
        content_type: head.headers.content_type().map(str::to_string),
        headers: match route {
            Route::Onion => Vec::new(),
            Route::Clearnet => head.headers.select(CLEARNET_REQUEST_HEADERS),
        },
    };
    let fetched = match route {
        Route::Onion => app.onion.fetch(&request).await,
        Route::Clearnet => app.clearnet.fetch(&request).await,
    };
    let fetched = match fetched {
        Ok(fetched) => fetched,
        Err(err) => {
            let kind = classify_forward_error(&err);
            metrics::record_upstream_error(kind.label());
            log_forward_error(&kind, peer, &target.host, &err);
            respond_with_access_log(
                reader.get_mut(),
                kind.status(),
                &kind.client_message(route.is_onion()),
                client_timeout,
                request_bytes,
                log.error_reason(kind.label()),
                start.elapsed(),
            )
            .await?;
            return Ok(ClientDisposition::Close);
        }
    };

    let redirects = fetched.redirects;
    let content_length = declared_length(&method, &fetched);
    let (headers, body) = prepare_response(route, style, &target, fetched);

    let mut log = log;
    if redirects > 0 {
        log = log.redirects(redirects);
    }
    if is_cacheable(&method, headers.status) {
        let ttl = ttl_for(&headers.raw);
        let outcome = app.cache.put(
            &key,
            headers.status,
            headers.filtered.clone(),
            body.clone(),
            ttl,
        );
        log = log.cache_store(outcome.as_str());
    }

    let content_length = content_length.unwrap_or(body.len() as u64);
    let response = Outgoing {
        status: headers.status,
        headers: &headers.filtered,
        body: &body,
        content_length,
    };
    finish(
        reader.get_mut(),
        head,
        response,
        false,
        client_timeout,
        request_bytes,
        log,
        start,
    )
    .await
}

async fn serve_cached<S>(
    reader: &mut BufReader<S>,
    head: &Http1RequestHead,
    cached: CachedResponse,
    client_timeout: Duration,
    request_bytes: u64,
    log: AccessLogBuilder,
    start: Instant,
) -> Result<ClientDisposition>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let response = Outgoing {
        status: cached.status,
        headers: &cached.headers,
        body: &cached.body,
        content_length: cached.body.len() as u64,
    };
    finish(
        reader.get_mut(),
        head,
        response,
        false,
        client_timeout,
        request_bytes,
        log.cache_lookup("hit"),
        start,
    )
    .await
}

struct ResponseHeaders {
    status: StatusCode,
    /// Upstream headers as received; TTL heuristics read these.
    raw: Vec<(String, String)>,
    /// Headers sent to the client and stored in the cache.
    filtered: Vec<(String, String)>,
}

/// HEAD responses carry no body, so the upstream length is passed through when present.
fn declared_length(method: &Method, fetched: &FetchedResponse) -> Option<u64> {
    if method != Method::HEAD {
        return None;
    }
    header_value(&fetched.headers, "content-length").and_then(|value| value.trim().parse().ok())
}

/// Filters headers and, for onion HTML, rewrites links for the request style in use.
fn prepare_response(
    route: Route,
    style: RequestStyle,
    target: &TargetUrl,
    fetched: FetchedResponse,
) -> (ResponseHeaders, Bytes) {
    let FetchedResponse {
        status,
        headers: raw,
        body,
        ..
    } = fetched;
    let mut filtered = filter_response_headers(&raw);
    if !route.is_onion() {
        return (
            ResponseHeaders {
                status,
                raw,
                filtered,
            },
            body,
        );
    }

    let path_based = style == RequestStyle::PathBased;
    for (name, value) in filtered.iter_mut() {
        if name.eq_ignore_ascii_case("location") {
            *value = rewrite_location(value, &target.host, path_based);
        }
    }

    let rewrite = should_rewrite(
        header_value(&raw, "content-type"),
        header_value(&raw, "content-encoding"),
        &body,
    );
    let body = if rewrite {
        let rewritten = match style {
            RequestStyle::Forward => downgrade_onion_links(&body),
            RequestStyle::PathBased => rewrite_onion_paths(&body, &target.host),
        };
        Bytes::from(rewritten)
    } else {
        body
    };
    (
        ResponseHeaders {
            status,
            raw,
            filtered,
        },
        body,
    )
}

#[allow(clippy::too_many_arguments)]
async fn finish<S>(
    stream: &mut S,
    head: &Http1RequestHead,
    response: Outgoing<'_>,
    force_close: bool,
    client_timeout: Duration,
    request_bytes: u64,
    log: AccessLogBuilder,
    start: Instant,
) -> Result<ClientDisposition>
where
    S: AsyncWrite + Unpin,
{
    let keep_alive = head.keep_alive() && !force_close;
    let bytes_out = write_response(
        stream,
        response.status,
        response.headers,
        response.body,
        response.content_length,
        head.method == Method::HEAD,
        !keep_alive,
        client_timeout,
    )
    .await?;
    log.status(response.status)
        .bytes(request_bytes, bytes_out)
        .elapsed(start.elapsed())
        .log();
    if keep_alive {
        return Ok(ClientDisposition::Continue);
    }
    shutdown_stream(stream, client_timeout).await?;
    Ok(ClientDisposition::Close)
}
