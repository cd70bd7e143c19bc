use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Result;
use http::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::logging::AccessLogBuilder;
use crate::proxy::AppContext;
use crate::proxy::connect::{ConnectRequest, ConnectTarget, handle_connect};
use crate::proxy::request::{RequestRejected, RequestShape, classify_request, redacted_path};

use super::codec::read_http1_request_head;
use super::handler::{ClientDisposition, FetchContext, handle_fetch, handle_status};
use super::respond::respond_with_access_log;

/// Serves one client connection: keep-alive requests until the client leaves, or a CONNECT
/// tunnel which then owns the socket.
pub async fn handle_http(stream: TcpStream, peer: SocketAddr, app: AppContext) -> Result<()> {
    let proxy_port = stream
        .local_addr()
        .map(|addr| addr.port())
        .unwrap_or_else(|_| app.settings.listen.port());
    serve_connection(stream, peer, proxy_port, &app).await
}

pub(crate) async fn serve_connection<S>(
    stream: S,
    peer: SocketAddr,
    proxy_port: u16,
    app: &AppContext,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match serve_http_loop(stream, peer, proxy_port, app).await? {
        LoopOutcome::Completed => Ok(()),
        LoopOutcome::Connect(connect) => {
            let PendingConnect {
                mut stream,
                target,
                pending,
                request_bytes,
                start,
            } = connect;
            handle_connect(
                ConnectRequest {
                    stream: &mut stream,
                    peer,
                    target,
                    pending,
                    request_bytes,
                    start,
                },
                app,
            )
            .await
        }
    }
}

struct PendingConnect<S> {
    stream: S,
    target: ConnectTarget,
    pending: Vec<u8>,
    request_bytes: u64,
    start: Instant,
}

enum LoopOutcome<S> {
    Completed,
    Connect(PendingConnect<S>),
}

async fn serve_http_loop<S>(
    stream: S,
    peer: SocketAddr,
    proxy_port: u16,
    app: &AppContext,
) -> Result<LoopOutcome<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut reader = BufReader::new(stream);
    let client_timeout = app.settings.client_timeout();

    loop {
        let head = match read_http1_request_head(
            &mut reader,
            peer,
            client_timeout,
            client_timeout,
            app.settings.max_request_header_size,
        )
        .await
        {
            Ok(Some(head)) => head,
            Ok(None) => break,
            Err(err) => {
                debug!(peer = %peer, error = %format!("{err:#}"), "malformed request head");
                respond_with_access_log(
                    reader.get_mut(),
                    StatusCode::BAD_REQUEST,
                    "Malformed request",
                    client_timeout,
                    0,
                    AccessLogBuilder::new(peer)
                        .route("reject")
                        .error_reason("malformed_request"),
                    std::time::Duration::ZERO,
                )
                .await?;
                break;
            }
        };
        let start = Instant::now();
        let request_bytes = head.total_bytes();
        let log = AccessLogBuilder::new(peer)
            .method(head.method.as_str())
            .path(redacted_path(&head.target));

        if !is_supported_method(&head.method) {
            respond_with_access_log(
                reader.get_mut(),
                StatusCode::NOT_IMPLEMENTED,
                "Method not supported",
                client_timeout,
                request_bytes,
                log.route("reject").error_reason("method_not_supported"),
                start.elapsed(),
            )
            .await?;
            break;
        }

        let shape = match classify_request(&head.method, &head.target, head.headers.host()) {
            Ok(shape) => shape,
            Err(err) => {
                let (status, message) = match err.downcast_ref::<RequestRejected>() {
                    Some(rejected) => (rejected.status, rejected.message.clone()),
                    None => (StatusCode::BAD_REQUEST, "Bad request".to_string()),
                };
                debug!(peer = %peer, status = status.as_u16(), error = %format!("{err:#}"), "rejecting request");
                respond_with_access_log(
                    reader.get_mut(),
                    status,
                    &message,
                    client_timeout,
                    request_bytes,
                    log.route("reject").error_reason("bad_request"),
                    start.elapsed(),
                )
                .await?;
                break;
            }
        };

        let disposition = match shape {
            RequestShape::Status => {
                handle_status(&mut reader, &head, proxy_port, app, log, start).await?
            }
            RequestShape::Connect(target) => {
                let pending = reader.buffer().to_vec();
                return Ok(LoopOutcome::Connect(PendingConnect {
                    stream: reader.into_inner(),
                    target,
                    pending,
                    request_bytes,
                    start,
                }));
            }
            RequestShape::Fetch { target, style } => {
                let ctx = FetchContext {
                    peer,
                    head: &head,
                    target,
                    style,
                    log,
                    start,
                };
                handle_fetch(&mut reader, ctx, app).await?
            }
        };

        if matches!(disposition, ClientDisposition::Close) {
            break;
        }
    }

    Ok(LoopOutcome::Completed)
}

fn is_supported_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::POST | Method::CONNECT
    )
}
