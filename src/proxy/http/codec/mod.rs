mod headers;
mod line;
mod request;
mod response;

pub(crate) use line::read_line_with_timeout;
pub(crate) use request::{Http1RequestHead, read_http1_request_head};
pub(crate) use response::{encode_http1_response, read_http1_response_head};
