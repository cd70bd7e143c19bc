mod body;
mod cache_control;
mod codec;
mod handler;
mod respond;
mod server;

pub use body::{BodyTooLarge, ResponseTooLarge};
pub(crate) use body::{
    BodySide, BodySizeTracker, read_body_until_close, read_chunked_body, read_fixed_body,
};
pub(crate) use codec::read_http1_response_head;
pub use respond::{respond_with_access_log, send_response, shutdown_stream};
pub use server::handle_http;

#[cfg(feature = "fuzzing")]
pub mod fuzzing {
    use std::net::SocketAddr;
    use std::time::Duration;

    use anyhow::Result;
    use tokio::io::{AsyncRead, BufReader};

    use super::body::{BodySide, BodySizeTracker};

    /// Parses a request head and sorts it into a request shape.
    pub async fn parse_http1_request_head<S>(
        reader: &mut BufReader<S>,
        peer: SocketAddr,
        timeout: Duration,
        max_header_bytes: usize,
    ) -> Result<()>
    where
        S: AsyncRead + Unpin,
    {
        if let Some(head) =
            super::codec::read_http1_request_head(reader, peer, timeout, timeout, max_header_bytes)
                .await?
        {
            let _ = crate::proxy::request::classify_request(
                &head.method,
                &head.target,
                head.headers.host(),
            );
            let _ = head.headers.content_length();
            let _ = head.keep_alive();
        }
        Ok(())
    }

    pub async fn decode_chunked_body<S>(
        reader: &mut BufReader<S>,
        peer: SocketAddr,
        timeout: Duration,
        max_body_bytes: usize,
    ) -> Result<Vec<u8>>
    where
        S: AsyncRead + Unpin,
    {
        let mut tracker = BodySizeTracker::new(BodySide::Request, max_body_bytes);
        super::body::read_chunked_body(reader, timeout, peer, &mut tracker).await
    }
}
