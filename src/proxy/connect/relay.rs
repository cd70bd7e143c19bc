use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::io_util::write_all_with_timeout;

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelEnd {
    ClientClosed,
    UpstreamClosed,
    IdleTimeout,
    Error,
}

impl TunnelEnd {
    pub fn as_str(self) -> &'static str {
        match self {
            TunnelEnd::ClientClosed => "client_closed",
            TunnelEnd::UpstreamClosed => "upstream_closed",
            TunnelEnd::IdleTimeout => "idle_timeout",
            TunnelEnd::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TunnelStats {
    pub client_bytes: u64,
    pub upstream_bytes: u64,
}

/// Copies bytes in both directions until one side closes, an I/O error occurs, or neither side
/// has produced data for `idle_timeout`. `pending` holds client bytes that arrived with the
/// CONNECT head and are sent upstream first. Both streams are shut down before returning.
pub async fn relay<C, U>(
    client: &mut C,
    upstream: &mut U,
    pending: &[u8],
    idle_timeout: Duration,
) -> (TunnelStats, TunnelEnd)
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let mut stats = TunnelStats::default();
    let end = match pump(client, upstream, pending, idle_timeout, &mut stats).await {
        Ok(end) => end,
        Err(err) => {
            debug!(error = %err, "tunnel relay ended with error");
            TunnelEnd::Error
        }
    };

    if let Err(err) = upstream.shutdown().await {
        debug!(error = %err, "failed to shut down tunnel upstream");
    }
    if let Err(err) = client.shutdown().await {
        debug!(error = %err, "failed to shut down tunnel client");
    }
    (stats, end)
}

async fn pump<C, U>(
    client: &mut C,
    upstream: &mut U,
    pending: &[u8],
    idle_timeout: Duration,
    stats: &mut TunnelStats,
) -> Result<TunnelEnd>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    if !pending.is_empty() {
        write_all_with_timeout(upstream, pending, idle_timeout, "forwarding buffered tunnel bytes")
            .await?;
        stats.client_bytes += pending.len() as u64;
    }

    let mut client_buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut upstream_buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        tokio::select! {
            read = client.read(&mut client_buf) => {
                let n = read.context("reading from tunnel client")?;
                if n == 0 {
                    return Ok(TunnelEnd::ClientClosed);
                }
                write_all_with_timeout(
                    upstream,
                    &client_buf[..n],
                    idle_timeout,
                    "forwarding to tunnel upstream",
                )
                .await?;
                stats.client_bytes += n as u64;
            }
            read = upstream.read(&mut upstream_buf) => {
                let n = read.context("reading from tunnel upstream")?;
                if n == 0 {
                    return Ok(TunnelEnd::UpstreamClosed);
                }
                write_all_with_timeout(
                    client,
                    &upstream_buf[..n],
                    idle_timeout,
                    "forwarding to tunnel client",
                )
                .await?;
                stats.upstream_bytes += n as u64;
            }
            _ = tokio::time::sleep(idle_timeout) => {
                return Ok(TunnelEnd::IdleTimeout);
            }
        }
    }
}
