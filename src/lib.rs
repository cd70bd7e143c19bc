pub mod cli;
pub mod io_util;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod settings;
pub mod util;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    proxy::{StatusInfo, StatusStore, cache::ResponseCache, fetch::OnionFetcher},
    settings::Settings,
};

pub async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    if let Some(addr) = settings.metrics_listen {
        let path = "/metrics".to_string();
        tokio::spawn(async move {
            info!(address = %addr, "metrics endpoint starting");
            if let Err(err) = crate::metrics::serve(addr, path).await {
                tracing::error!(error = %err, "metrics endpoint failed");
            }
        });
    }

    let (status_tx, status_rx) = watch::channel(StatusInfo::from_settings(&settings));
    spawn_reload_task(settings.clone(), status_tx);
    let status = StatusStore::new(status_rx);

    let cache = ResponseCache::new(settings.cache_max_entries, settings.cache_total_capacity)?;
    spawn_bridge_probe(OnionFetcher::new(&settings));

    let app = proxy::AppContext::new(settings, status, cache);
    proxy::run(app).await
}

/// The bridge is supervised separately and may come up after us, so a failed probe only warns.
fn spawn_bridge_probe(fetcher: OnionFetcher) {
    tokio::spawn(async move {
        let bridge = fetcher.bridge_addr();
        match fetcher.probe().await {
            Ok(true) => info!(bridge = %bridge, "onion bridge is ready"),
            Ok(false) => warn!(bridge = %bridge, "onion bridge answered but reported not ready"),
            Err(err) => warn!(
                bridge = %bridge,
                error = %format!("{err:#}"),
                "onion bridge is not reachable yet"
            ),
        }
    });
}

#[cfg(unix)]
fn spawn_reload_task(settings: Arc<Settings>, status_tx: watch::Sender<StatusInfo>) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hup = match signal(SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGHUP handler");
                return;
            }
        };

        while hup.recv().await.is_some() {
            info!("received SIGHUP; reloading status identity");
            match Settings::load_from(settings.config_path.as_deref()) {
                Ok(reloaded) => {
                    let info = StatusInfo::from_settings(&reloaded);
                    let onion_address = info.onion_address.clone();
                    if let Err(err) = status_tx.send(info) {
                        tracing::error!(error = %err, "failed to publish reloaded status");
                        break;
                    }
                    info!(onion_address = ?onion_address, "status identity reloaded");
                }
                Err(err) => {
                    tracing::error!(error = ?err, "configuration reload failed");
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_task(_settings: Arc<Settings>, _status_tx: watch::Sender<StatusInfo>) {
    info!("SIGHUP reload is not supported on this platform");
}

#[cfg(feature = "fuzzing")]
pub mod fuzzing {
    pub use crate::proxy::fetch::fuzzing::read_upstream_response;
    pub use crate::proxy::http::fuzzing::{decode_chunked_body, parse_http1_request_head};
    pub use crate::proxy::request::classify_request;
    pub use crate::proxy::rewrite::{rewrite_location, rewrite_onion_paths};
}
