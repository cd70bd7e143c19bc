use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use onion_proxy::{
    cli::LogFormat,
    proxy::{self, AppContext, StatusInfo, StatusStore, cache::ResponseCache},
    settings::Settings,
};

use super::http_utils::{HttpResponse, read_http_response};
use super::net::{find_free_port, wait_for_listener};

pub fn default_test_settings(listen: SocketAddr, bridge_addr: SocketAddr) -> Settings {
    Settings {
        listen,
        bridge_addr,
        log: LogFormat::Text,
        client_timeout: 5,
        upstream_connect_timeout: 2,
        upstream_timeout: 5,
        tunnel_idle_timeout: 5,
        max_response_body_size: 1024 * 1024,
        ..Settings::default()
    }
}

pub struct ProxyHarness {
    pub addr: SocketAddr,
    pub settings: Arc<Settings>,
    pub cache: ResponseCache,
    status_tx: watch::Sender<StatusInfo>,
    handle: JoinHandle<()>,
}

impl ProxyHarness {
    pub async fn connect(&self) -> Result<TcpStream> {
        Ok(TcpStream::connect(self.addr).await?)
    }

    /// Sends raw request bytes on a fresh connection and reads until the proxy closes it.
    pub async fn send(&self, request: &str) -> Result<HttpResponse> {
        let mut stream = self.connect().await?;
        stream.write_all(request.as_bytes()).await?;
        read_http_response(&mut stream).await
    }

    pub async fn get(&self, target: &str) -> Result<HttpResponse> {
        self.send(&format!(
            "GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        ))
        .await
    }

    pub fn publish_status(&self, info: StatusInfo) {
        let _ = self.status_tx.send(info);
    }

    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

pub struct ProxyHarnessBuilder {
    bridge_addr: SocketAddr,
    settings_override: Option<Box<dyn FnOnce(&mut Settings) + Send>>,
}

impl ProxyHarnessBuilder {
    pub fn new(bridge_addr: SocketAddr) -> Self {
        Self {
            bridge_addr,
            settings_override: None,
        }
    }

    pub fn with_settings<F>(mut self, func: F) -> Self
    where
        F: FnOnce(&mut Settings) + Send + 'static,
    {
        self.settings_override = Some(Box::new(func));
        self
    }

    pub async fn spawn(mut self) -> Result<ProxyHarness> {
        let proxy_port = find_free_port()?;
        let proxy_addr: SocketAddr = format!("127.0.0.1:{proxy_port}")
            .parse()
            .expect("valid listen address");

        let mut settings = default_test_settings(proxy_addr, self.bridge_addr);
        if let Some(override_fn) = self.settings_override.take() {
            override_fn(&mut settings);
        }
        settings.validate()?;
        let proxy_addr = settings.listen;
        let settings = Arc::new(settings);

        let (status_tx, status_rx) = watch::channel(StatusInfo::from_settings(&settings));
        let cache = ResponseCache::new(settings.cache_max_entries, settings.cache_total_capacity)?;
        let app = AppContext::new(settings.clone(), StatusStore::new(status_rx), cache.clone());

        let handle = tokio::spawn(async move {
            if let Err(err) = proxy::run(app).await {
                tracing::error!(error = ?err, "proxy run failed");
            }
        });

        wait_for_listener(proxy_addr).await?;

        Ok(ProxyHarness {
            addr: proxy_addr,
            settings,
            cache,
            status_tx,
            handle,
        })
    }
}
