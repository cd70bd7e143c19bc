use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail, ensure};
use http::{StatusCode, Version};
use tokio::io::{AsyncRead, BufReader};
use tracing::warn;

use super::headers::Http1HeaderLine;
use super::line::read_line_with_timeout;

pub(crate) struct Http1ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub headers: Vec<Http1HeaderLine>,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub connection_close: bool,
}

impl Http1ResponseHead {
    /// Header pairs with lowercase names, in upstream order. Framing headers are dropped since
    /// bodies are re-framed before they reach the client.
    pub fn lowercase_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter(|header| {
                !matches!(
                    header.lower_name(),
                    "transfer-encoding" | "connection" | "keep-alive" | "trailer"
                )
            })
            .map(|header| (header.lower_name().to_string(), header.value.clone()))
            .collect()
    }

    /// 1xx, 204 and 304 responses never carry a body.
    pub fn is_bodyless(&self) -> bool {
        self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
    }
}

/// Serializes a complete response head for the client. `Content-Length` and the CORS header are
/// always present; `headers` must already be filtered.
pub(crate) fn encode_http1_response(
    status: StatusCode,
    headers: &[(String, String)],
    content_length: u64,
    connection_close: bool,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(256);
    buffer.extend_from_slice(b"HTTP/1.1 ");
    buffer.extend_from_slice(status.as_str().as_bytes());
    buffer.push(b' ');
    buffer.extend_from_slice(status.canonical_reason().unwrap_or("Unknown").as_bytes());
    buffer.extend_from_slice(b"\r\n");

    for (name, value) in headers {
        buffer.extend_from_slice(name.as_bytes());
        buffer.extend_from_slice(b": ");
        buffer.extend_from_slice(value.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }

    buffer.extend_from_slice(b"Content-Length: ");
    buffer.extend_from_slice(content_length.to_string().as_bytes());
    buffer.extend_from_slice(b"\r\n");
    buffer.extend_from_slice(b"Access-Control-Allow-Origin: *\r\n");
    buffer.extend_from_slice(b"Connection: ");
    buffer.extend_from_slice(if connection_close {
        b"close".as_slice()
    } else {
        b"keep-alive".as_slice()
    });
    buffer.extend_from_slice(b"\r\n\r\n");
    buffer
}

pub(crate) async fn read_http1_response_head<S>(
    reader: &mut BufReader<S>,
    timeout_dur: Duration,
    peer: SocketAddr,
    max_header_bytes: usize,
) -> Result<Http1ResponseHead>
where
    S: AsyncRead + Unpin,
{
    ensure!(
        max_header_bytes > 0,
        "max response header size must be greater than zero"
    );
    let mut used = 0usize;
    let mut status_line = String::new();

    let bytes = read_line_with_timeout(
        reader,
        &mut status_line,
        timeout_dur,
        peer,
        max_header_bytes,
    )
    .await?;
    if bytes == 0 {
        bail!("upstream closed connection before sending status line");
    }
    used += bytes;
    let trimmed = status_line.trim_end_matches(['\r', '\n']);
    let (version, status) = parse_http1_status_line(trimmed)?;

    let mut headers = Vec::new();
    let mut content_length = None;
    let mut chunked = false;
    let mut transfer_encoding_present = false;
    let mut connection_close = matches!(version, Version::HTTP_10);

    let mut header_line = String::new();
    loop {
        let remaining = max_header_bytes
            .checked_sub(used)
            .filter(|remaining| *remaining > 0)
            .ok_or_else(|| anyhow!("upstream response headers exceed configured limit"))?;
        let read =
            read_line_with_timeout(reader, &mut header_line, timeout_dur, peer, remaining).await?;
        if read == 0 {
            bail!("upstream closed connection during headers");
        }
        used += read;
        let trimmed_line = header_line.trim_end_matches(['\r', '\n']);
        if trimmed_line.is_empty() {
            break;
        }
        let (name, value) = trimmed_line
            .split_once(':')
            .ok_or_else(|| anyhow!("header missing ':' separator from upstream"))?;
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            if content_length.is_some() {
                bail!("multiple Content-Length headers from upstream are not supported");
            }
            let parsed: u64 = value
                .parse()
                .with_context(|| format!("invalid Content-Length value '{value}'"))?;
            content_length = Some(parsed);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            transfer_encoding_present = true;
            if value.to_ascii_lowercase().contains("chunked") {
                chunked = true;
            }
        } else if name.eq_ignore_ascii_case("connection") {
            for token in value.split(',').map(str::trim) {
                if token.eq_ignore_ascii_case("close") {
                    connection_close = true;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    connection_close = false;
                }
            }
        }
        headers.push(Http1HeaderLine::new(name, value));
    }

    if transfer_encoding_present && content_length.is_some() {
        warn!(
            peer = %peer,
            "upstream response contained both Transfer-Encoding and Content-Length; rejecting"
        );
        bail!("upstream response must not include both Transfer-Encoding and Content-Length");
    }
    if transfer_encoding_present && !chunked {
        bail!("upstream response used an unsupported Transfer-Encoding");
    }

    Ok(Http1ResponseHead {
        version,
        status,
        headers,
        content_length,
        chunked,
        connection_close,
    })
}

pub(crate) fn parse_http1_status_line(value: &str) -> Result<(Version, StatusCode)> {
    let mut parts = value.split_whitespace();
    let version = parts
        .next()
        .ok_or_else(|| anyhow!("upstream status line missing HTTP version"))?;
    let status = parts
        .next()
        .ok_or_else(|| anyhow!("upstream status line missing status code"))?;

    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => bail!("unsupported upstream HTTP version '{other}'"),
    };

    let status_code: u16 = status
        .parse()
        .with_context(|| format!("invalid upstream status code '{status}'"))?;
    let status = StatusCode::from_u16(status_code)
        .map_err(|_| anyhow!("unsupported upstream status code '{status_code}'"))?;

    Ok((version, status))
}
