use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use bytes::Bytes;
use http::Method;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::trace;

use crate::io_util::write_all_with_timeout;
use crate::proxy::http::{
    BodySide, BodySizeTracker, ResponseTooLarge, read_body_until_close, read_chunked_body,
    read_fixed_body, read_http1_response_head,
};

use super::{FetchLimits, FetchedResponse, UpstreamTimeout};

/// One HTTP/1.1 request on a fresh connection. The connection is closed after the response.
pub(super) struct OutboundRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub host: &'a str,
    pub headers: &'a [(String, String)],
    pub body: Option<&'a [u8]>,
}

pub(super) fn encode_request(request: &OutboundRequest<'_>) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(256);
    buffer.extend_from_slice(request.method.as_str().as_bytes());
    buffer.extend_from_slice(b" ");
    buffer.extend_from_slice(request.path.as_bytes());
    buffer.extend_from_slice(b" HTTP/1.1\r\n");

    buffer.extend_from_slice(b"Host: ");
    buffer.extend_from_slice(request.host.as_bytes());
    buffer.extend_from_slice(b"\r\n");

    for (name, value) in request.headers {
        buffer.extend_from_slice(name.as_bytes());
        buffer.extend_from_slice(b": ");
        buffer.extend_from_slice(value.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }

    buffer.extend_from_slice(b"Connection: close\r\n");

    let body_len = request.body.map(<[u8]>::len).unwrap_or(0);
    if body_len > 0 || request.method == Method::POST {
        buffer.extend_from_slice(b"Content-Length: ");
        buffer.extend_from_slice(body_len.to_string().as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }

    buffer.extend_from_slice(b"\r\n");
    if let Some(body) = request.body {
        buffer.extend_from_slice(body);
    }
    buffer
}

/// Bounds `exchange` by the configured total upstream timeout.
pub(super) async fn with_exchange_deadline<F, T>(
    limits: &FetchLimits,
    target: &str,
    exchange: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limits.exchange_timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamTimeout {
            target: target.to_string(),
            timeout: limits.exchange_timeout,
        }
        .into()),
    }
}

pub(super) async fn send_and_receive<S>(
    mut stream: S,
    peer: SocketAddr,
    request: &OutboundRequest<'_>,
    limits: &FetchLimits,
) -> Result<FetchedResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let encoded = encode_request(request);
    write_all_with_timeout(
        &mut stream,
        &encoded,
        limits.exchange_timeout,
        "writing upstream request",
    )
    .await?;
    read_response(stream, peer, request.method, limits).await
}

/// Reads the final response, skipping interim 1xx heads, and collects the body according to its
/// framing.
pub(super) async fn read_response<S>(
    stream: S,
    peer: SocketAddr,
    method: &Method,
    limits: &FetchLimits,
) -> Result<FetchedResponse>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let head = loop {
        let head = read_http1_response_head(
            &mut reader,
            limits.exchange_timeout,
            peer,
            limits.max_header_bytes,
        )
        .await?;
        if head.status.is_informational() {
            trace!(peer = %peer, status = head.status.as_u16(), "skipping interim response");
            continue;
        }
        break head;
    };

    let mut tracker = BodySizeTracker::new(BodySide::Response, limits.max_body_bytes);
    let body = if method == Method::HEAD || head.is_bodyless() {
        Vec::new()
    } else if head.chunked {
        read_chunked_body(&mut reader, limits.exchange_timeout, peer, &mut tracker).await?
    } else if let Some(length) = head.content_length {
        let length =
            usize::try_from(length).map_err(|_| ResponseTooLarge { bytes_read: length })?;
        read_fixed_body(
            &mut reader,
            length,
            limits.exchange_timeout,
            peer,
            &mut tracker,
        )
        .await?
    } else {
        read_body_until_close(&mut reader, limits.exchange_timeout, peer, &mut tracker).await?
    };

    Ok(FetchedResponse {
        status: head.status,
        headers: head.lowercase_headers(),
        body: Bytes::from(body),
        redirects: 0,
    })
}
