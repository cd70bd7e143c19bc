use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use thiserror::Error;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::debug;

use crate::util::timeout_with_context;

/// Attached as context when no TCP connection to an upstream could be established, so callers
/// can tell "could not reach" apart from failures mid-exchange.
#[derive(Debug, Error)]
#[error("unable to reach {target}")]
pub struct UpstreamUnreachable {
    pub target: String,
}

pub async fn resolve_host(host: &str, port: u16, timeout_dur: Duration) -> Result<Vec<SocketAddr>> {
    let lookup = lookup_host((host, port));
    let addrs = timeout_with_context(
        timeout_dur,
        lookup,
        format!("resolving DNS for {host}:{port}"),
    )
    .await?;
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for addr in addrs {
        if seen.insert(addr) {
            unique.push(addr);
        }
    }
    if unique.is_empty() {
        bail!("no addresses found for {host}:{port}");
    }
    Ok(unique)
}

/// Attempt to connect to the supplied socket addresses in order, returning the first success.
pub async fn connect_to_addrs(
    addrs: &[SocketAddr],
    connect_timeout: Duration,
) -> Result<(TcpStream, SocketAddr)> {
    let mut last_err = None;
    for addr in addrs {
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(
                        host = %addr.ip(),
                        port = addr.port(),
                        error = %err,
                        "failed to set TCP_NODELAY on upstream stream"
                    );
                }
                debug!(host = %addr.ip(), port = addr.port(), "connected to upstream");
                return Ok((stream, *addr));
            }
            Ok(Err(err)) => {
                last_err = Some(anyhow!(err).context(format!("failed to connect to {addr}")));
            }
            Err(_) => {
                last_err = Some(anyhow!("connection to {addr} timed out"));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("no addresses provided for upstream connect")))
}

/// Resolves `host` and connects to the first reachable address. Any failure carries an
/// [`UpstreamUnreachable`] context.
pub async fn connect_host(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<(TcpStream, SocketAddr)> {
    let unreachable = || UpstreamUnreachable {
        target: format!("{host}:{port}"),
    };
    let addrs = resolve_host(host, port, connect_timeout)
        .await
        .with_context(unreachable)?;
    connect_to_addrs(&addrs, connect_timeout)
        .await
        .with_context(unreachable)
}
