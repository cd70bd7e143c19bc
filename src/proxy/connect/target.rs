use anyhow::{Context, Result, bail};

use crate::proxy::request::parse_host_header;
use crate::proxy::route::Route;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
}

impl ConnectTarget {
    pub fn route(&self) -> Route {
        Route::classify(&self.host)
    }

    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Parses the `host:port` authority of a CONNECT request, falling back to the Host header when
/// the request target itself is unusable.
pub fn parse_connect_target(target: &str, host_header: Option<&str>) -> Result<ConnectTarget> {
    match parse_host_port(target) {
        Ok(parsed) => Ok(parsed),
        Err(first_err) => {
            if let Some(host) = host_header {
                parse_host_port(host).with_context(|| {
                    format!(
                        "failed to parse CONNECT target '{target}'; Host fallback '{host}' also invalid"
                    )
                })
            } else {
                Err(first_err.context("CONNECT request missing Host header fallback"))
            }
        }
    }
}

fn parse_host_port(value: &str) -> Result<ConnectTarget> {
    let (host, port) = parse_host_header(value)?;
    let Some(port) = port else {
        bail!("CONNECT target must include an explicit port");
    };
    Ok(ConnectTarget { host, port })
}
