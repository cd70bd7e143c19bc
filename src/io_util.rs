use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::util::timeout_with_context;

pub async fn write_all_with_timeout<S>(
    stream: &mut S,
    bytes: &[u8],
    timeout_dur: Duration,
    context: &str,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    timeout_with_context(timeout_dur, stream.write_all(bytes), context).await?;
    Ok(())
}

/// Writes a response head and optional body, then flushes. Returns total bytes written.
pub async fn write_head_and_body<S>(
    stream: &mut S,
    head: &[u8],
    body: Option<&[u8]>,
    timeout_dur: Duration,
) -> Result<u64>
where
    S: AsyncWrite + Unpin,
{
    write_all_with_timeout(stream, head, timeout_dur, "writing response head").await?;
    let mut written = head.len() as u64;
    if let Some(body) = body.filter(|body| !body.is_empty()) {
        write_all_with_timeout(stream, body, timeout_dur, "writing response body").await?;
        written += body.len() as u64;
    }
    timeout_with_context(timeout_dur, stream.flush(), "flushing response").await?;
    Ok(written)
}
