use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow, ensure};
use config::{Config, ConfigError, Environment, File};
use http::header::HeaderName;
use serde::Deserialize;
use tracing::warn;

use crate::cli::{Cli, LogFormat};

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9077))
}

fn default_bridge_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_bridge_path() -> String {
    "/__op_proxy.php".to_string()
}

fn default_bridge_url_header() -> String {
    "X-OnionPress-URL".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_client_timeout() -> u64 {
    30
}

fn default_upstream_connect_timeout() -> u64 {
    10
}

fn default_upstream_timeout() -> u64 {
    60
}

fn default_tunnel_idle_timeout() -> u64 {
    60
}

fn default_max_request_header_size() -> usize {
    32 * 1024
}

fn default_max_response_header_size() -> usize {
    32 * 1024
}

fn default_max_request_body_size() -> usize {
    16 * 1024 * 1024
}

fn default_max_response_body_size() -> usize {
    64 * 1024 * 1024
}

fn default_max_redirects() -> usize {
    5
}

fn default_cache_max_entries() -> usize {
    5_000
}

fn default_cache_total_capacity() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_bridge_addr")]
    pub bridge_addr: SocketAddr,
    #[serde(default = "default_bridge_path")]
    pub bridge_path: String,
    #[serde(default = "default_bridge_url_header")]
    pub bridge_url_header: String,
    #[serde(default)]
    pub onion_address: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
    #[serde(default = "default_tunnel_idle_timeout")]
    pub tunnel_idle_timeout: u64,
    #[serde(default = "default_max_request_header_size")]
    pub max_request_header_size: usize,
    #[serde(default = "default_max_response_header_size")]
    pub max_response_header_size: usize,
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size: usize,
    #[serde(default = "default_max_response_body_size")]
    pub max_response_body_size: usize,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "default_cache_total_capacity")]
    pub cache_total_capacity: u64,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
    /// File the settings were read from, kept so SIGHUP can re-read it.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            bridge_addr: default_bridge_addr(),
            bridge_path: default_bridge_path(),
            bridge_url_header: default_bridge_url_header(),
            onion_address: None,
            version: default_version(),
            log: default_log_format(),
            client_timeout: default_client_timeout(),
            upstream_connect_timeout: default_upstream_connect_timeout(),
            upstream_timeout: default_upstream_timeout(),
            tunnel_idle_timeout: default_tunnel_idle_timeout(),
            max_request_header_size: default_max_request_header_size(),
            max_response_header_size: default_max_response_header_size(),
            max_request_body_size: default_max_request_body_size(),
            max_response_body_size: default_max_response_body_size(),
            max_redirects: default_max_redirects(),
            cache_max_entries: default_cache_max_entries(),
            cache_total_capacity: default_cache_total_capacity(),
            metrics_listen: None,
            config_path: None,
        }
    }
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = resolve_config_path(cli);
        Self::load_from(config_path.as_deref())
    }

    /// Builds settings from an optional TOML file layered under `ONION_PROXY__*` environment
    /// overrides. Without a file, built-in defaults apply.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("ONION_PROXY")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.config_path = config_path.map(Path::to_path_buf);
        settings.validate()?;
        Ok(settings)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn tunnel_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_idle_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_request_header_size > 0,
            "max_request_header_size must be greater than 0 (got {})",
            self.max_request_header_size
        );
        ensure!(
            self.max_response_header_size > 0,
            "max_response_header_size must be greater than 0 (got {})",
            self.max_response_header_size
        );
        ensure!(
            self.max_request_body_size > 0,
            "max_request_body_size must be greater than 0 (got {})",
            self.max_request_body_size
        );
        ensure!(
            self.max_response_body_size > 0,
            "max_response_body_size must be greater than 0 (got {})",
            self.max_response_body_size
        );
        ensure!(
            self.client_timeout > 0,
            "client_timeout must be greater than 0 seconds (got {})",
            self.client_timeout
        );
        ensure!(
            self.upstream_connect_timeout > 0,
            "upstream_connect_timeout must be greater than 0 seconds (got {})",
            self.upstream_connect_timeout
        );
        ensure!(
            self.upstream_timeout > 0,
            "upstream_timeout must be greater than 0 seconds (got {})",
            self.upstream_timeout
        );
        ensure!(
            self.tunnel_idle_timeout > 0,
            "tunnel_idle_timeout must be greater than 0 seconds (got {})",
            self.tunnel_idle_timeout
        );
        ensure!(
            self.cache_max_entries > 0,
            "cache_max_entries must be greater than 0 (got {})",
            self.cache_max_entries
        );
        ensure!(
            self.cache_total_capacity > 0,
            "cache_total_capacity must be greater than 0 (got {})",
            self.cache_total_capacity
        );
        ensure!(
            self.bridge_path.starts_with('/'),
            "bridge_path must start with '/' (got '{}')",
            self.bridge_path
        );
        HeaderName::from_bytes(self.bridge_url_header.as_bytes()).map_err(|_| {
            anyhow!(
                "bridge_url_header '{}' is not a valid header name",
                self.bridge_url_header
            )
        })?;
        if !self.listen.ip().is_loopback() {
            warn!(
                address = %self.listen,
                "proxy listener is not bound to a loopback address"
            );
        }
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = cli.config_path() {
        return Some(path.to_path_buf());
    }

    default_config_candidates()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/onion-proxy/onion-proxy.toml"),
        PathBuf::from("onion-proxy.toml"),
    ]
}
