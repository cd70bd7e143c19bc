use anyhow::{Result, anyhow, bail};
use http::header::HeaderName;

use crate::proxy::headers::{HeaderAction, RequestHeaderSanitizer};

#[derive(Clone, Debug)]
pub(crate) struct Http1HeaderLine {
    pub name: String,
    pub value: String,
    lower_name: String,
}

impl Http1HeaderLine {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let lower_name = name.to_ascii_lowercase();
        Self {
            name,
            value: value.into(),
            lower_name,
        }
    }

    pub fn lower_name(&self) -> &str {
        &self.lower_name
    }
}

/// Collects the header block of a client request. Framing headers are tracked by the sanitizer;
/// everything else is kept for later selection.
pub(crate) struct Http1HeaderAccumulator {
    sanitizer: RequestHeaderSanitizer,
    headers: Vec<Http1HeaderLine>,
}

impl Http1HeaderAccumulator {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            sanitizer: RequestHeaderSanitizer::new(max_bytes),
            headers: Vec::new(),
        }
    }

    pub fn push_line(&mut self, line: &str) -> Result<bool> {
        let line_len = line.len();
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            self.sanitizer.reserve(line_len)?;
            return Ok(false);
        }

        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("header missing ':' separator"))?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            bail!("header name must not be empty");
        }
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| anyhow!("invalid header name '{name}'"))?;
        if let HeaderAction::Keep = self.sanitizer.record(name, value, line_len)? {
            self.headers.push(Http1HeaderLine::new(name, value));
        }
        Ok(true)
    }

    pub fn host(&self) -> Option<&str> {
        self.sanitizer.host()
    }

    pub fn content_length(&self) -> Option<usize> {
        self.sanitizer.content_length()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.sanitizer.content_type()
    }

    pub fn is_chunked(&self) -> bool {
        self.sanitizer.is_chunked()
    }

    pub fn total_bytes(&self) -> usize {
        self.sanitizer.total_bytes()
    }

    /// Kept headers whose lowercase name is in `names`, skipping any listed in `Connection`.
    pub fn select(&self, names: &[&str]) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter(|header| names.contains(&header.lower_name()))
            .filter(|header| !self.has_connection_token(header.lower_name()))
            .map(|header| (header.name.clone(), header.value.clone()))
            .collect()
    }

    pub fn has_connection_token(&self, token: &str) -> bool {
        self.sanitizer.connection_tokens().contains(token)
    }

    pub fn wants_connection_close(&self) -> bool {
        self.has_connection_token("close")
    }
}
