use std::time::Duration;

use anyhow::Result;
use http::StatusCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::io_util::write_head_and_body;
use crate::logging::AccessLogBuilder;
use crate::util::timeout_with_context;

use super::codec::encode_http1_response;

/// Writes a complete response. For `HEAD` the body is withheld but `content_length` still
/// describes it.
#[allow(clippy::too_many_arguments)]
pub async fn write_response<S>(
    stream: &mut S,
    status: StatusCode,
    headers: &[(String, String)],
    body: &[u8],
    content_length: u64,
    head_only: bool,
    close: bool,
    timeout_dur: Duration,
) -> Result<u64>
where
    S: AsyncWrite + Unpin,
{
    let head = encode_http1_response(status, headers, content_length, close);
    let body = if head_only { None } else { Some(body) };
    write_head_and_body(stream, &head, body, timeout_dur).await
}

/// Plain-text response used for rejections and upstream failures. Always closes the connection.
pub async fn send_response<S>(
    stream: &mut S,
    status: StatusCode,
    message: &str,
    timeout_dur: Duration,
) -> Result<u64>
where
    S: AsyncWrite + Unpin,
{
    let body = format!("{message}\n");
    let headers = [(
        "Content-Type".to_string(),
        "text/plain; charset=utf-8".to_string(),
    )];
    write_response(
        stream,
        status,
        &headers,
        body.as_bytes(),
        body.len() as u64,
        false,
        true,
        timeout_dur,
    )
    .await
}

pub async fn respond_with_access_log<S>(
    stream: &mut S,
    status: StatusCode,
    message: &str,
    timeout_dur: Duration,
    bytes_in: u64,
    log_builder: AccessLogBuilder,
    elapsed: Duration,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bytes_out = send_response(stream, status, message, timeout_dur).await?;
    shutdown_stream(stream, timeout_dur).await?;
    log_builder
        .status(status)
        .bytes(bytes_in, bytes_out)
        .elapsed(elapsed)
        .log();
    Ok(())
}

pub async fn shutdown_stream<S>(stream: &mut S, timeout_dur: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timeout_with_context(
        timeout_dur,
        stream.shutdown(),
        "shutting down client stream",
    )
    .await
}
