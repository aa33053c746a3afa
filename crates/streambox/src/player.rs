use std::sync::Arc;

use m3u::Channel;
use parking_lot::Mutex;
use reqwest::Client;
use tracing::{info, warn};

use crate::activity::{ActivityStore, LocalActivityStore};
use crate::captions::{CaptionEngine, SpeechRecognizer};
use crate::config::PlayerConfig;
use crate::engine::EngineFactory;
use crate::error::PlayerError;
use crate::hls::HlsEngineFactory;
use crate::overlay::{DisplayMode, OverlayController};
use crate::prefetch::{ManifestCache, ManifestPrefetcher};
use crate::request::PlaybackRequest;
use crate::session::{SessionController, SessionStatus};
use crate::sink::MediaSink;

/// Builder for [`StreamBox`].
pub struct StreamBoxBuilder {
    sink: Arc<dyn MediaSink>,
    config: PlayerConfig,
    client: Option<Client>,
    engines: Option<Arc<dyn EngineFactory>>,
    activity: Option<Arc<dyn ActivityStore>>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
}

impl StreamBoxBuilder {
    pub fn config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Replace the built-in HLS engine.
    pub fn engine(mut self, engines: Arc<dyn EngineFactory>) -> Self {
        self.engines = Some(engines);
        self
    }

    pub fn activity(mut self, store: Arc<dyn ActivityStore>) -> Self {
        self.activity = Some(store);
        self
    }

    pub fn recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<StreamBox, PlayerError> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let client = self.client.unwrap_or_default();
        let cache = ManifestCache::from_config(&config.prefetch);

        let engines = self.engines.unwrap_or_else(|| {
            Arc::new(HlsEngineFactory::new(
                client.clone(),
                config.hls.clone(),
                cache.clone(),
            )) as Arc<dyn EngineFactory>
        });
        let activity = self
            .activity
            .unwrap_or_else(|| Arc::new(LocalActivityStore::in_memory()) as Arc<dyn ActivityStore>);

        Ok(StreamBox {
            session: SessionController::new(Arc::clone(&config), engines),
            overlay: OverlayController::new(Arc::clone(&self.sink), &config.overlay),
            captions: CaptionEngine::new(self.recognizer, config.captions.clone()),
            prefetcher: ManifestPrefetcher::new(client, config.prefetch.clone(), cache),
            sink: self.sink,
            activity,
            current: Mutex::new(None),
        })
    }
}

/// The playback core as one object: channel selection drives the session
/// controller, while overlay and captions follow the same sink.
pub struct StreamBox {
    sink: Arc<dyn MediaSink>,
    session: SessionController,
    overlay: OverlayController,
    captions: CaptionEngine,
    prefetcher: ManifestPrefetcher,
    activity: Arc<dyn ActivityStore>,
    current: Mutex<Option<Channel>>,
}

impl StreamBox {
    pub fn builder(sink: Arc<dyn MediaSink>) -> StreamBoxBuilder {
        StreamBoxBuilder {
            sink,
            config: PlayerConfig::default(),
            client: None,
            engines: None,
            activity: None,
            recognizer: None,
        }
    }

    /// Count a view and start playing `channel` in the full player.
    pub async fn select_channel(&self, channel: &Channel) -> Result<(), PlayerError> {
        if let Err(e) = self.activity.increment_views(&channel.url).await {
            warn!(url = %channel.url, error = %e, "Failed to record view");
        }

        self.session
            .start_session(PlaybackRequest::from(channel), Arc::clone(&self.sink))?;
        info!(channel = %channel.name, group = %channel.group, "Channel selected");

        *self.current.lock() = Some(channel.clone());
        self.set_mode(DisplayMode::Full);
        Ok(())
    }

    /// Warm the manifest of a channel the viewer is pointing at.
    pub fn hover(&self, channel: &Channel) -> bool {
        self.prefetcher.prefetch(&channel.url)
    }

    pub fn minimize(&self) {
        if self.current.lock().is_some() {
            self.set_mode(DisplayMode::Mini);
        }
    }

    pub fn expand(&self) {
        if self.current.lock().is_some() {
            self.set_mode(DisplayMode::Full);
        }
    }

    /// Pause, tear down the session and hide the player.
    pub fn close(&self) {
        self.sink.pause();
        self.session.stop_session();
        self.current.lock().take();
        self.set_mode(DisplayMode::Hidden);
    }

    /// Flip captions on or off and return the new setting.
    pub fn toggle_captions(&self) -> bool {
        let enabled = self.overlay.toggle_captions();
        self.captions.set_enabled(enabled);
        enabled
    }

    fn set_mode(&self, mode: DisplayMode) {
        self.overlay.set_display_mode(mode);
        self.captions.set_display_mode(mode);
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn current_channel(&self) -> Option<Channel> {
        self.current.lock().clone()
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn overlay(&self) -> &OverlayController {
        &self.overlay
    }

    pub fn captions(&self) -> &CaptionEngine {
        &self.captions
    }

    pub fn activity(&self) -> &Arc<dyn ActivityStore> {
        &self.activity
    }

    pub fn sink(&self) -> &Arc<dyn MediaSink> {
        &self.sink
    }
}

impl Drop for StreamBox {
    fn drop(&mut self) {
        self.captions.shutdown();
        self.session.stop_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngineFactory;
    use crate::sink::{MediaSource, MemorySink};

    fn player(sink: &Arc<MemorySink>, factory: &MockEngineFactory) -> StreamBox {
        StreamBox::builder(sink.clone())
            .engine(Arc::new(factory.clone()))
            .build()
            .unwrap()
    }

    fn channel(url: &str) -> Channel {
        Channel::new("Alpha News", url)
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_channel_starts_session() {
        let sink = Arc::new(MemorySink::default());
        let factory = MockEngineFactory::new();
        let player = player(&sink, &factory);

        player
            .select_channel(&channel("https://x/alpha.m3u8"))
            .await
            .unwrap();

        assert_eq!(player.status(), SessionStatus::Buffering);
        assert_eq!(factory.stats().attached, 1);
        assert_eq!(player.overlay().state().display_mode, DisplayMode::Full);
        assert_eq!(
            player.activity().get_activity("https://x/alpha.m3u8").await.views,
            1
        );
        assert_eq!(
            player.current_channel().map(|c| c.name),
            Some("Alpha News".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_tears_everything_down() {
        let sink = Arc::new(MemorySink::default());
        let factory = MockEngineFactory::new();
        let player = player(&sink, &factory);

        player
            .select_channel(&channel("https://x/clip.mp4"))
            .await
            .unwrap();
        assert_eq!(
            sink.source(),
            Some(MediaSource::Progressive("https://x/clip.mp4".to_string()))
        );

        player.close();
        assert_eq!(player.status(), SessionStatus::Idle);
        assert!(sink.source().is_none());
        assert!(sink.is_paused());
        assert!(player.current_channel().is_none());
        assert_eq!(player.overlay().state().display_mode, DisplayMode::Hidden);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimize_keeps_playing() {
        let sink = Arc::new(MemorySink::default());
        let factory = MockEngineFactory::new();
        let player = player(&sink, &factory);

        player.minimize();
        assert_eq!(player.overlay().state().display_mode, DisplayMode::Hidden);

        player
            .select_channel(&channel("https://x/alpha.m3u8"))
            .await
            .unwrap();
        player.minimize();
        assert_eq!(player.overlay().state().display_mode, DisplayMode::Mini);
        assert_eq!(factory.stats().active, 1);

        player.expand();
        assert_eq!(player.overlay().state().display_mode, DisplayMode::Full);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_channels_replaces_session() {
        let sink = Arc::new(MemorySink::default());
        let factory = MockEngineFactory::new();
        let player = player(&sink, &factory);

        player
            .select_channel(&channel("https://x/alpha.m3u8"))
            .await
            .unwrap();
        player
            .select_channel(&channel("https://x/beta.m3u8"))
            .await
            .unwrap();

        let stats = factory.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.peak_active, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hover_only_prefetches_adaptive_urls() {
        let sink = Arc::new(MemorySink::default());
        let factory = MockEngineFactory::new();
        let player = player(&sink, &factory);
        assert!(!player.hover(&channel("https://x/clip.mp4")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_captions_updates_overlay() {
        let sink = Arc::new(MemorySink::default());
        let factory = MockEngineFactory::new();
        let player = player(&sink, &factory);

        assert!(player.toggle_captions());
        assert!(player.overlay().state().captions_enabled);
        assert!(!player.captions().is_listening());
        assert!(!player.toggle_captions());
    }
}
