use std::net::SocketAddr;

use anyhow::Error;
use http::StatusCode;
use tracing::warn;

use crate::proxy::{
    fetch::UpstreamTimeout,
    http::{BodyTooLarge, ResponseTooLarge},
    upstream::UpstreamUnreachable,
};

/// Normalized classification of fetch failures so every failure maps to one status and one
/// metric label.
pub enum ForwardErrorKind<'a> {
    RequestBodyTooLarge(&'a BodyTooLarge),
    ResponseTooLarge(&'a ResponseTooLarge),
    Timeout(&'a UpstreamTimeout),
    Unreachable(&'a UpstreamUnreachable),
    Other,
}

impl ForwardErrorKind<'_> {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardErrorKind::RequestBodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ForwardErrorKind::RequestBodyTooLarge(_) => "request_too_large",
            ForwardErrorKind::ResponseTooLarge(_) => "response_too_large",
            ForwardErrorKind::Timeout(_) => "timeout",
            ForwardErrorKind::Unreachable(_) => "unreachable",
            ForwardErrorKind::Other => "upstream_error",
        }
    }

    /// Short reason sent to the client in the response body.
    pub fn client_message(&self, onion: bool) -> String {
        let via = if onion { "through the onion bridge" } else { "from upstream" };
        match self {
            ForwardErrorKind::RequestBodyTooLarge(_) => "Request body too large".to_string(),
            ForwardErrorKind::ResponseTooLarge(_) => format!("Response {via} too large"),
            ForwardErrorKind::Timeout(_) => format!("Timed out fetching {via}"),
            ForwardErrorKind::Unreachable(unreachable) => {
                format!("Unable to reach {}", unreachable.target)
            }
            ForwardErrorKind::Other => format!("Failed to fetch {via}"),
        }
    }
}

pub fn classify_forward_error(err: &Error) -> ForwardErrorKind<'_> {
    if let Some(body) = err.downcast_ref::<BodyTooLarge>() {
        ForwardErrorKind::RequestBodyTooLarge(body)
    } else if let Some(response) = err.downcast_ref::<ResponseTooLarge>() {
        ForwardErrorKind::ResponseTooLarge(response)
    } else if let Some(timeout) = err.downcast_ref::<UpstreamTimeout>() {
        ForwardErrorKind::Timeout(timeout)
    } else if let Some(unreachable) = err.downcast_ref::<UpstreamUnreachable>() {
        ForwardErrorKind::Unreachable(unreachable)
    } else {
        ForwardErrorKind::Other
    }
}

pub fn log_forward_error(kind: &ForwardErrorKind<'_>, peer: SocketAddr, host: &str, err: &Error) {
    match kind {
        ForwardErrorKind::Timeout(timeout) => warn!(
            peer = %peer,
            host,
            target = %timeout.target,
            timeout_ms = timeout.timeout.as_millis() as u64,
            "upstream fetch timed out"
        ),
        ForwardErrorKind::ResponseTooLarge(response) => warn!(
            peer = %peer,
            host,
            bytes_read = response.bytes_read,
            "upstream response exceeded size limit"
        ),
        ForwardErrorKind::Unreachable(unreachable) => warn!(
            peer = %peer,
            host,
            target = %unreachable.target,
            error = %format!("{err:#}"),
            "upstream unreachable"
        ),
        ForwardErrorKind::Other => warn!(
            peer = %peer,
            host,
            error = %format!("{err:#}"),
            "upstream request failed"
        ),
        ForwardErrorKind::RequestBodyTooLarge(_) => {}
    }
}
