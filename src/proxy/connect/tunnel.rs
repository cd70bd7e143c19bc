use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::{
    logging::AccessLogBuilder,
    metrics,
    proxy::{AppContext, http::respond_with_access_log, upstream},
    util::timeout_with_context,
};

use super::relay::relay;
use super::target::ConnectTarget;

const CONNECT_ESTABLISHED: &[u8] =
    b"HTTP/1.1 200 Connection Established\r\nProxy-Agent: onion-proxy\r\n\r\n";

pub struct ConnectRequest<'a, S> {
    pub stream: &'a mut S,
    pub peer: SocketAddr,
    pub target: ConnectTarget,
    /// Client bytes read past the CONNECT head before the tunnel existed.
    pub pending: Vec<u8>,
    pub request_bytes: u64,
    pub start: Instant,
}

/// Runs a CONNECT request to completion. Onion hosts are refused before any connection attempt;
/// other hosts get a direct TCP connection relayed until close or idle timeout.
pub async fn handle_connect<S>(ctx: ConnectRequest<'_, S>, app: &AppContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ConnectRequest {
        stream,
        peer,
        target,
        pending,
        request_bytes,
        start,
    } = ctx;
    let client_timeout = app.settings.client_timeout();
    let log = AccessLogBuilder::for_tunnel(peer, target.host.clone(), target.authority());

    if target.route().is_onion() {
        debug!(peer = %peer, target = %target.authority(), "refusing CONNECT to onion host");
        return respond_with_access_log(
            stream,
            StatusCode::BAD_GATEWAY,
            "CONNECT to .onion hosts is not supported; request them over http:// instead",
            client_timeout,
            request_bytes,
            log.error_reason("onion_connect"),
            start.elapsed(),
        )
        .await;
    }

    let (mut upstream_stream, upstream_addr) = match upstream::connect_host(
        &target.host,
        target.port,
        app.settings.upstream_connect_timeout(),
    )
    .await
    {
        Ok(connected) => connected,
        Err(err) => {
            warn!(
                peer = %peer,
                target = %target.authority(),
                error = %format!("{err:#}"),
                "CONNECT upstream unreachable"
            );
            metrics::record_upstream_error("unreachable");
            return respond_with_access_log(
                stream,
                StatusCode::BAD_GATEWAY,
                &format!("Unable to connect to {}", target.authority()),
                client_timeout,
                request_bytes,
                log.error_reason("unreachable"),
                start.elapsed(),
            )
            .await;
        }
    };

    let handshake_bytes = send_connect_established(stream, client_timeout).await?;
    debug!(peer = %peer, upstream = %upstream_addr, "tunnel established");

    metrics::tunnel_opened();
    let (stats, end) = relay(
        stream,
        &mut upstream_stream,
        &pending,
        app.settings.tunnel_idle_timeout(),
    )
    .await;
    metrics::tunnel_closed(stats.client_bytes, stats.upstream_bytes);
    debug!(
        peer = %peer,
        target = %target.authority(),
        end = end.as_str(),
        client_bytes = stats.client_bytes,
        upstream_bytes = stats.upstream_bytes,
        "tunnel closed"
    );

    log.status(StatusCode::OK)
        .bytes(
            request_bytes + stats.client_bytes,
            handshake_bytes + stats.upstream_bytes,
        )
        .elapsed(start.elapsed())
        .log();
    Ok(())
}

pub async fn send_connect_established<S>(stream: &mut S, client_timeout: Duration) -> Result<u64>
where
    S: AsyncWrite + Unpin,
{
    timeout_with_context(
        client_timeout,
        stream.write_all(CONNECT_ESTABLISHED),
        "writing CONNECT response",
    )
    .await?;
    timeout_with_context(client_timeout, stream.flush(), "flushing CONNECT response").await?;
    Ok(CONNECT_ESTABLISHED.len() as u64)
}
