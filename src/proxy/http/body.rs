use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::{proxy::http::codec::read_line_with_timeout, util::timeout_with_context};

const MAX_CHUNK_LINE_LENGTH: usize = 8192;
const READ_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Error)]
#[error("request body exceeds configured limit")]
pub struct BodyTooLarge {
    pub bytes_read: u64,
}

#[derive(Debug, Error)]
#[error("upstream response body exceeds configured limit")]
pub struct ResponseTooLarge {
    pub bytes_read: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySide {
    Request,
    Response,
}

/// Tracks cumulative payload bytes and enforces a configured limit. The error type depends on
/// which side of the exchange is being read so callers can pick the right status.
pub struct BodySizeTracker {
    side: BodySide,
    max_bytes: usize,
    total_bytes: u64,
}

impl BodySizeTracker {
    pub fn new(side: BodySide, max_bytes: usize) -> Self {
        Self {
            side,
            max_bytes,
            total_bytes: 0,
        }
    }

    pub fn record(&mut self, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.total_bytes = self.total_bytes.saturating_add(len as u64);
        if self.total_bytes > self.max_bytes as u64 {
            let bytes_read = self.total_bytes;
            return Err(match self.side {
                BodySide::Request => BodyTooLarge { bytes_read }.into(),
                BodySide::Response => ResponseTooLarge { bytes_read }.into(),
            });
        }
        Ok(())
    }

    pub fn total(&self) -> u64 {
        self.total_bytes
    }
}

/// Reads exactly `length` bytes. The limit is checked against the declared length before any
/// byte is read.
pub async fn read_fixed_body<S>(
    reader: &mut BufReader<S>,
    length: usize,
    timeout_dur: Duration,
    peer: SocketAddr,
    tracker: &mut BodySizeTracker,
) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    tracker.record(length)?;
    let mut body = Vec::with_capacity(length.min(64 * 1024));
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut remaining = length;
    while remaining > 0 {
        let to_read = remaining.min(buffer.len());
        let read = timeout_with_context(
            timeout_dur,
            reader.read(&mut buffer[..to_read]),
            format!("reading body from {peer}"),
        )
        .await?;
        if read == 0 {
            bail!(
                "unexpected EOF from {peer} with {remaining} of {length} body bytes outstanding"
            );
        }
        body.extend_from_slice(&buffer[..read]);
        remaining -= read;
    }
    Ok(body)
}

/// Decodes a chunked body into a contiguous buffer. Trailers are read and discarded.
pub async fn read_chunked_body<S>(
    reader: &mut BufReader<S>,
    timeout_dur: Duration,
    peer: SocketAddr,
    tracker: &mut BodySizeTracker,
) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    let mut line = String::new();

    loop {
        let size_bytes =
            read_line_with_timeout(reader, &mut line, timeout_dur, peer, MAX_CHUNK_LINE_LENGTH)
                .await?;
        if size_bytes == 0 {
            bail!("unexpected EOF while reading chunk size from {peer}");
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let size_str = trimmed
            .split_once(';')
            .map(|(size, _)| size)
            .unwrap_or(trimmed)
            .trim();
        let chunk_size = usize::from_str_radix(size_str, 16)
            .with_context(|| format!("invalid chunk size '{size_str}'"))?;

        if chunk_size == 0 {
            loop {
                let trailer_bytes = read_line_with_timeout(
                    reader,
                    &mut line,
                    timeout_dur,
                    peer,
                    MAX_CHUNK_LINE_LENGTH,
                )
                .await?;
                if trailer_bytes == 0 {
                    bail!("unexpected EOF while reading chunk trailer from {peer}");
                }
                if line.trim_end_matches(['\r', '\n']).is_empty() {
                    break;
                }
            }
            break;
        }

        tracker.record(chunk_size)?;
        let mut remaining = chunk_size;
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        while remaining > 0 {
            let to_read = remaining.min(buffer.len());
            let read = timeout_with_context(
                timeout_dur,
                reader.read(&mut buffer[..to_read]),
                format!("reading chunk data from {peer}"),
            )
            .await?;
            if read == 0 {
                bail!("unexpected EOF while reading chunk data from {peer}");
            }
            body.extend_from_slice(&buffer[..read]);
            remaining -= read;
        }

        let mut crlf = [0u8; 2];
        timeout_with_context(
            timeout_dur,
            reader.read_exact(&mut crlf),
            format!("reading chunk terminator from {peer}"),
        )
        .await?;
        if &crlf != b"\r\n" {
            bail!("invalid chunk terminator when reading from {peer}");
        }
    }

    Ok(body)
}

/// Reads until the peer closes its write side. Used for responses framed by connection close.
pub async fn read_body_until_close<S>(
    reader: &mut BufReader<S>,
    timeout_dur: Duration,
    peer: SocketAddr,
    tracker: &mut BodySizeTracker,
) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut body = Vec::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    loop {
        let read = timeout_with_context(
            timeout_dur,
            reader.read(&mut buffer),
            format!("reading response body from {peer}"),
        )
        .await?;
        if read == 0 {
            break;
        }
        tracker.record(read)?;
        body.extend_from_slice(&buffer[..read]);
    }
    Ok(body)
}
