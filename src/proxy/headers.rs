use std::collections::HashSet;

use anyhow::{Context, Result, anyhow, bail, ensure};

/// Response headers copied from an upstream (or cache entry) to the client.
pub const RESPONSE_HEADER_ALLOWLIST: &[&str] = &[
    "content-type",
    "cache-control",
    "etag",
    "last-modified",
    "content-disposition",
    "content-encoding",
    "vary",
    "location",
];

/// Request headers a clearnet fetch passes through. `Host` is synthesized separately.
pub const CLEARNET_REQUEST_HEADERS: &[&str] = &["accept", "accept-language", "accept-encoding"];

pub fn is_allowed_response_header(name: &str) -> bool {
    RESPONSE_HEADER_ALLOWLIST
        .iter()
        .any(|allowed| name.eq_ignore_ascii_case(allowed))
}

/// Keeps allow-listed headers in their original order.
pub fn filter_response_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| is_allowed_response_header(name))
        .cloned()
        .collect()
}

/// Case-insensitive lookup of the first header with `name`.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderDisposition {
    Connection,
    Host,
    ContentLength,
    TransferEncoding,
    ContentType,
    Skip,
    Keep,
}

pub fn classify_request_header(name: &str) -> HeaderDisposition {
    match name {
        "connection" => HeaderDisposition::Connection,
        "host" => HeaderDisposition::Host,
        "content-length" => HeaderDisposition::ContentLength,
        "transfer-encoding" => HeaderDisposition::TransferEncoding,
        "content-type" => HeaderDisposition::ContentType,
        "keep-alive" | "upgrade" | "te" | "trailer" => HeaderDisposition::Skip,
        other if other.starts_with("proxy-") => HeaderDisposition::Skip,
        _ => HeaderDisposition::Keep,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderAction {
    Keep,
    Skip,
}

/// Tracks framing headers of an inbound request and enforces the header byte budget.
#[derive(Debug, Clone)]
pub struct RequestHeaderSanitizer {
    max_bytes: usize,
    consumed: usize,
    host: Option<String>,
    content_length: Option<usize>,
    content_type: Option<String>,
    chunked: bool,
    connection_tokens: HashSet<String>,
    transfer_encoding_seen: bool,
}

impl RequestHeaderSanitizer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            consumed: 0,
            host: None,
            content_length: None,
            content_type: None,
            chunked: false,
            connection_tokens: HashSet::new(),
            transfer_encoding_seen: false,
        }
    }

    pub fn reserve(&mut self, byte_len: usize) -> Result<()> {
        self.consumed = self
            .consumed
            .checked_add(byte_len)
            .ok_or_else(|| anyhow!("header section exceeds configured limit"))?;
        ensure!(
            self.consumed <= self.max_bytes,
            "header section exceeds configured limit"
        );
        Ok(())
    }

    pub fn record(&mut self, name: &str, value: &str, byte_len: usize) -> Result<HeaderAction> {
        self.reserve(byte_len)?;

        let name_lower = name.to_ascii_lowercase();
        match classify_request_header(&name_lower) {
            HeaderDisposition::Connection => {
                self.record_connection_tokens(value);
                Ok(HeaderAction::Skip)
            }
            HeaderDisposition::Host => {
                if self.host.is_some() {
                    bail!("duplicate Host header");
                }
                ensure!(!value.is_empty(), "Host header must not be empty");
                self.host = Some(value.to_ascii_lowercase());
                Ok(HeaderAction::Skip)
            }
            HeaderDisposition::ContentLength => {
                if self.chunked {
                    bail!("request must not include both Content-Length and Transfer-Encoding");
                }
                if self.content_length.is_some() {
                    bail!("multiple Content-Length headers are not supported");
                }
                let length: usize = value
                    .parse()
                    .with_context(|| format!("invalid Content-Length value '{value}'"))?;
                self.content_length = Some(length);
                Ok(HeaderAction::Skip)
            }
            HeaderDisposition::TransferEncoding => {
                if self.transfer_encoding_seen {
                    bail!("duplicate Transfer-Encoding header");
                }
                self.transfer_encoding_seen = true;
                let encodings: Vec<String> = value
                    .split(',')
                    .map(|item| item.trim().to_ascii_lowercase())
                    .filter(|item| !item.is_empty())
                    .collect();
                if encodings.len() != 1 || encodings[0] != "chunked" {
                    bail!("unsupported Transfer-Encoding '{value}'");
                }
                if self.content_length.is_some() {
                    bail!("request must not include both Content-Length and Transfer-Encoding");
                }
                self.chunked = true;
                Ok(HeaderAction::Skip)
            }
            HeaderDisposition::ContentType => {
                if self.content_type.is_none() && !value.is_empty() {
                    self.content_type = Some(value.to_string());
                }
                Ok(HeaderAction::Skip)
            }
            HeaderDisposition::Skip => Ok(HeaderAction::Skip),
            HeaderDisposition::Keep => Ok(HeaderAction::Keep),
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn total_bytes(&self) -> usize {
        self.consumed
    }

    pub fn connection_tokens(&self) -> &HashSet<String> {
        &self.connection_tokens
    }

    fn record_connection_tokens(&mut self, value: &str) {
        for token in value.split(',') {
            let trimmed = token.trim();
            if trimmed.is_empty() {
                continue;
            }
            self.connection_tokens.insert(trimmed.to_ascii_lowercase());
        }
    }
}
