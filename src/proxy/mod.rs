pub mod cache;
pub mod connect;
pub mod fetch;
pub mod forward_error;
pub mod headers;
pub mod http;
pub mod listener;
pub mod request;
pub mod rewrite;
pub mod route;
pub mod status;
pub mod upstream;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;

use crate::settings::Settings;

use self::cache::ResponseCache;
use self::fetch::{ClearnetFetcher, OnionFetcher};

/// Identity reported by `/status`. Republished on reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInfo {
    pub onion_address: Option<String>,
    pub version: String,
}

impl StatusInfo {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            onion_address: settings.onion_address.clone(),
            version: settings.version.clone(),
        }
    }
}

#[derive(Clone)]
pub struct StatusStore {
    rx: watch::Receiver<StatusInfo>,
}

impl StatusStore {
    pub fn new(rx: watch::Receiver<StatusInfo>) -> Self {
        Self { rx }
    }

    pub fn snapshot(&self) -> StatusInfo {
        self.rx.borrow().clone()
    }
}

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub status: StatusStore,
    pub cache: ResponseCache,
    pub onion: OnionFetcher,
    pub clearnet: ClearnetFetcher,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>, status: StatusStore, cache: ResponseCache) -> Self {
        let onion = OnionFetcher::new(&settings);
        let clearnet = ClearnetFetcher::new(&settings);
        Self {
            settings,
            status,
            cache,
            onion,
            clearnet,
        }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    listener::start_listener(app).await
}

#[cfg(test)]
pub(crate) fn test_app(settings: Settings) -> AppContext {
    let (_tx, rx) = watch::channel(StatusInfo::from_settings(&settings));
    let cache = ResponseCache::new(settings.cache_max_entries, settings.cache_total_capacity)
        .expect("cache limits are valid");
    AppContext::new(Arc::new(settings), StatusStore::new(rx), cache)
}
