//! Manifest prefetch on hover/focus.
//!
//! Warming is best effort: failures are logged at debug level and never
//! reach the session controller. A warmed manifest is handed to the first
//! session that loads the same URL and then dropped, since live playlists
//! go stale within a couple of target durations.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use moka::future::Cache;
use parking_lot::Mutex;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use tracing::debug;

use crate::config::{DEFAULT_USER_AGENT, PrefetchConfig};
use crate::request::is_adaptive_url;

/// Short-lived store of prefetched manifest bodies keyed by URL.
#[derive(Clone)]
pub struct ManifestCache {
    inner: Cache<String, Bytes>,
}

impl ManifestCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn from_config(config: &PrefetchConfig) -> Self {
        Self::new(config.cache_ttl, config.max_entries)
    }

    pub async fn insert(&self, url: &str, body: Bytes) {
        self.inner.insert(url.to_string(), body).await;
    }

    /// Remove and return the body stored for `url`.
    pub async fn take(&self, url: &str) -> Option<Bytes> {
        self.inner.remove(url).await
    }

    pub fn contains(&self, url: &str) -> bool {
        self.inner.contains_key(url)
    }
}

/// Fire-and-forget manifest warmer.
#[derive(Clone)]
pub struct ManifestPrefetcher {
    client: Client,
    config: PrefetchConfig,
    cache: ManifestCache,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ManifestPrefetcher {
    pub fn new(client: Client, config: PrefetchConfig, cache: ManifestCache) -> Self {
        Self {
            client,
            config,
            cache,
            in_flight: Arc::default(),
        }
    }

    pub fn cache(&self) -> &ManifestCache {
        &self.cache
    }

    /// Start warming `url` in the background. Returns `false` when nothing
    /// was started: prefetch disabled, not an `.m3u8` URL, already cached or
    /// already in flight.
    pub fn prefetch(&self, url: &str) -> bool {
        if !self.config.enabled || !is_adaptive_url(url) || self.cache.contains(url) {
            return false;
        }
        if !self.in_flight.lock().insert(url.to_string()) {
            return false;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.in_flight.lock().remove(url);
            return false;
        };

        let this = self.clone();
        let url = url.to_string();
        handle.spawn(async move {
            match this.fetch(&url).await {
                Ok(body) => {
                    debug!(url = %url, bytes = body.len(), "Prefetched manifest");
                    this.cache.insert(&url, body).await;
                }
                Err(e) => debug!(url = %url, error = %e, "Manifest prefetch failed"),
            }
            this.in_flight.lock().remove(&url);
        });
        true
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, reqwest::Error> {
        self.client
            .get(url)
            .timeout(self.config.request_timeout)
            .header(USER_AGENT, DEFAULT_USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await
    }
}
