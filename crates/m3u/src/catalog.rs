use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::error::CatalogError;
use crate::parser::parse_channels;

/// Public IPTV directory used when no playlist URL is configured.
pub const DEFAULT_PLAYLIST_URL: &str = "https://iptv-org.github.io/iptv/index.m3u";

/// Fetches and parses a published channel playlist.
#[derive(Debug, Clone)]
pub struct ChannelCatalog {
    client: Client,
    playlist_url: String,
    timeout: Duration,
}

impl ChannelCatalog {
    pub fn new(client: Client, playlist_url: impl Into<String>) -> Self {
        Self {
            client,
            playlist_url: playlist_url.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn playlist_url(&self) -> &str {
        &self.playlist_url
    }

    /// Download the playlist and parse it into channels.
    ///
    /// Directory playlists run to tens of thousands of lines, so parsing is
    /// moved off the async worker threads.
    pub async fn fetch_channels(&self) -> Result<Vec<Channel>, CatalogError> {
        debug!(url = %self.playlist_url, "Fetching channel playlist");
        let response = self
            .client
            .get(&self.playlist_url)
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CatalogError::http_status(
                response.status(),
                &self.playlist_url,
            ));
        }
        let content = response.text().await?;

        let channels = tokio::task::spawn_blocking(move || parse_channels(&content))
            .await
            .map_err(|e| CatalogError::Parse {
                reason: e.to_string(),
            })?;

        info!(
            url = %self.playlist_url,
            channels = channels.len(),
            "Channel catalog loaded"
        );
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_channels_parses_remote_playlist() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.m3u"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXTINF:-1 group-title=\"News\",One\nhttps://x/one.m3u8\n#EXTINF:-1,Two\nhttps://x/two.m3u8\n",
            ))
            .mount(&server)
            .await;

        let catalog = ChannelCatalog::new(Client::new(), format!("{}/index.m3u", server.uri()));
        let channels = catalog.fetch_channels().await.unwrap();

        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].name, "One");
        assert_eq!(channels[0].group, "News");
        assert_eq!(channels[1].name, "Two");
    }

    #[tokio::test]
    async fn test_fetch_channels_reports_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let catalog = ChannelCatalog::new(Client::new(), format!("{}/index.m3u", server.uri()));
        let err = catalog.fetch_channels().await.unwrap_err();

        assert!(matches!(
            err,
            CatalogError::HttpStatus { status, .. } if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        ));
    }
}
