//! Built-in HLS engine on top of `reqwest` and `m3u8-rs`.
//!
//! Each [`HlsSession`] runs one background loader task that fetches the
//! manifest (or takes a prefetched copy from the [`ManifestCache`]),
//! picks a rendition, and keeps appending segments to the sink from a few
//! segments behind the live edge. Fatal failures park the loader until the
//! controller asks for a reload or a decoder recovery.

mod error;
mod loader;
pub mod playlist;
pub mod retry;

pub use error::HlsError;

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::HlsEngineConfig;
use crate::engine::{AdaptiveSession, EngineEventReceiver, EngineFactory};
use crate::prefetch::ManifestCache;
use crate::sink::{MediaSink, MediaSource, SourceId};
use loader::{Command, Loader};

/// Creates [`HlsSession`]s sharing one HTTP client and manifest cache.
#[derive(Clone)]
pub struct HlsEngineFactory {
    client: Client,
    config: Arc<HlsEngineConfig>,
    cache: ManifestCache,
}

impl HlsEngineFactory {
    pub fn new(client: Client, config: HlsEngineConfig, cache: ManifestCache) -> Self {
        Self {
            client,
            config: Arc::new(config),
            cache,
        }
    }
}

impl EngineFactory for HlsEngineFactory {
    fn create(&self) -> Box<dyn AdaptiveSession> {
        Box::new(HlsSession {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            cache: self.cache.clone(),
            commands: None,
            token: CancellationToken::new(),
            task: None,
        })
    }
}

pub struct HlsSession {
    client: Client,
    config: Arc<HlsEngineConfig>,
    cache: ManifestCache,
    commands: Option<mpsc::UnboundedSender<Command>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HlsSession {
    fn send(&self, command: Command) {
        if let Some(commands) = &self.commands
            && commands.send(command).is_err()
        {
            debug!(?command, "HLS loader already finished");
        }
    }
}

impl AdaptiveSession for HlsSession {
    fn attach(&mut self, url: &str, sink: Arc<dyn MediaSink>) -> EngineEventReceiver {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let source = SourceId::next();
        sink.set_source(MediaSource::Adaptive {
            url: url.to_string(),
            id: source,
        });
        let loader = Loader {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            cache: self.cache.clone(),
            url: url.to_string(),
            sink,
            source,
            events: events_tx,
            token: self.token.child_token(),
        };
        self.commands = Some(commands_tx);
        self.task = Some(tokio::spawn(loader.run(commands_rx)));
        events_rx
    }

    fn start_load(&self) {
        self.send(Command::StartLoad);
    }

    fn recover_media_error(&self) {
        self.send(Command::RecoverMedia);
    }

    fn destroy(&mut self) {
        self.token.cancel();
        self.commands = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HlsSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::engine::{EngineEvent, ErrorDetails};
    use crate::sink::{MemorySink, SinkEvent};

    const VOD: &str = "#EXTM3U
#EXT-X-TARGETDURATION:2
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:2.0,
seg0.ts
#EXTINF:2.0,
seg1.ts
#EXT-X-ENDLIST
";

    fn fast_config() -> HlsEngineConfig {
        HlsEngineConfig {
            manifest_loading_timeout: Duration::from_secs(2),
            level_loading_timeout: Duration::from_secs(2),
            frag_loading_timeout: Duration::from_secs(2),
            frag_loading_max_retry: 0,
            retry_base_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(20),
            ..HlsEngineConfig::default()
        }
    }

    fn factory(cache: ManifestCache) -> HlsEngineFactory {
        HlsEngineFactory::new(Client::new(), fast_config(), cache)
    }

    fn cache() -> ManifestCache {
        ManifestCache::new(Duration::from_secs(10), 16)
    }

    async fn serve(server: &MockServer, route: &str, body: &'static str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn next_event(rx: &mut EngineEventReceiver) -> EngineEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("engine event in time")
            .expect("engine still running")
    }

    async fn wait_ended(sink: &mut tokio::sync::broadcast::Receiver<SinkEvent>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Ok(event) = sink.recv().await {
                if event == SinkEvent::Ended {
                    return;
                }
            }
        })
        .await
        .expect("stream end in time");
    }

    #[tokio::test]
    async fn test_vod_playlist_is_fully_appended() {
        let server = MockServer::start().await;
        serve(&server, "/vod.m3u8", VOD).await;
        serve(&server, "/seg0.ts", "AAAA").await;
        serve(&server, "/seg1.ts", "BBBBBB").await;

        let sink = Arc::new(MemorySink::default());
        let mut sink_events = sink.subscribe();
        let mut session = factory(cache()).create();
        let mut rx = session.attach(&format!("{}/vod.m3u8", server.uri()), sink.clone());

        assert_eq!(next_event(&mut rx).await, EngineEvent::ManifestParsed { levels: 1 });
        assert_eq!(
            next_event(&mut rx).await,
            EngineEvent::FragmentBuffered {
                sequence: 0,
                bytes: 4
            }
        );
        assert_eq!(
            next_event(&mut rx).await,
            EngineEvent::FragmentBuffered {
                sequence: 1,
                bytes: 6
            }
        );
        wait_ended(&mut sink_events).await;
        assert_eq!(sink.chunks_appended(), 2);
        assert_eq!(sink.buffered_bytes(), 10);
        session.destroy();
    }

    #[tokio::test]
    async fn test_master_playlist_selects_highest_bitrate() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/master.m3u8",
            "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=100000
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=900000
high/index.m3u8
",
        )
        .await;
        serve(
            &server,
            "/high/index.m3u8",
            "#EXTM3U
#EXT-X-TARGETDURATION:2
#EXTINF:2.0,
a.ts
#EXT-X-ENDLIST
",
        )
        .await;
        serve(&server, "/high/a.ts", "HIGH").await;

        let sink = Arc::new(MemorySink::default());
        let mut session = factory(cache()).create();
        let mut rx = session.attach(&format!("{}/master.m3u8", server.uri()), sink.clone());

        assert_eq!(next_event(&mut rx).await, EngineEvent::ManifestParsed { levels: 2 });
        assert_eq!(
            next_event(&mut rx).await,
            EngineEvent::FragmentBuffered {
                sequence: 0,
                bytes: 4
            }
        );
        session.destroy();
    }

    #[tokio::test]
    async fn test_missing_manifest_is_fatal_load_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.m3u8"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let sink = Arc::new(MemorySink::default());
        let mut session = factory(cache()).create();
        let mut rx = session.attach(&format!("{}/gone.m3u8", server.uri()), sink);

        match next_event(&mut rx).await {
            EngineEvent::Error(error) => {
                assert!(error.fatal);
                assert_eq!(error.details, ErrorDetails::ManifestLoadError);
            }
            other => panic!("unexpected event {other:?}"),
        }
        session.destroy();
    }

    #[tokio::test]
    async fn test_failed_segment_is_skipped() {
        let server = MockServer::start().await;
        serve(&server, "/vod.m3u8", VOD).await;
        Mock::given(method("GET"))
            .and(path("/seg0.ts"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        serve(&server, "/seg1.ts", "BB").await;

        let sink = Arc::new(MemorySink::default());
        let mut session = factory(cache()).create();
        let mut rx = session.attach(&format!("{}/vod.m3u8", server.uri()), sink.clone());

        assert!(matches!(
            next_event(&mut rx).await,
            EngineEvent::ManifestParsed { .. }
        ));
        match next_event(&mut rx).await {
            EngineEvent::Error(error) => {
                assert!(!error.fatal);
                assert_eq!(error.details, ErrorDetails::FragLoadError);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            next_event(&mut rx).await,
            EngineEvent::FragmentBuffered {
                sequence: 1,
                bytes: 2
            }
        );
        session.destroy();
    }

    #[tokio::test]
    async fn test_prefetched_manifest_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/warm.m3u8"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let url = format!("{}/warm.m3u8", server.uri());
        let cache = cache();
        cache
            .insert(
                &url,
                Bytes::from_static(b"#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXT-X-ENDLIST\n"),
            )
            .await;

        let sink = Arc::new(MemorySink::default());
        let mut sink_events = sink.subscribe();
        let mut session = factory(cache.clone()).create();
        let mut rx = session.attach(&url, sink);

        assert_eq!(next_event(&mut rx).await, EngineEvent::ManifestParsed { levels: 1 });
        wait_ended(&mut sink_events).await;
        assert!(cache.take(&url).await.is_none());
        session.destroy();
    }

    #[tokio::test]
    async fn test_start_load_reloads_after_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.m3u8"))
            .respond_with(ResponseTemplate::new(403))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        serve(
            &server,
            "/flaky.m3u8",
            "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXT-X-ENDLIST\n",
        )
        .await;

        let sink = Arc::new(MemorySink::default());
        let mut session = factory(cache()).create();
        let mut rx = session.attach(&format!("{}/flaky.m3u8", server.uri()), sink);

        assert!(matches!(next_event(&mut rx).await, EngineEvent::Error(e) if e.fatal));
        session.start_load();
        assert_eq!(next_event(&mut rx).await, EngineEvent::ManifestParsed { levels: 1 });
        session.destroy();
    }

    #[tokio::test]
    async fn test_destroy_closes_event_stream() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/live.m3u8",
            "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:1\n",
        )
        .await;

        let sink = Arc::new(MemorySink::default());
        let mut session = factory(cache()).create();
        let mut rx = session.attach(&format!("{}/live.m3u8", server.uri()), sink);
        assert!(matches!(
            next_event(&mut rx).await,
            EngineEvent::ManifestParsed { .. }
        ));

        session.destroy();
        session.destroy();
        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_rebound_sink_stops_loader() {
        let server = MockServer::start().await;
        serve(&server, "/vod.m3u8", VOD).await;
        Mock::given(method("GET"))
            .and(path("/seg0.ts"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("AAAA")
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        serve(&server, "/seg1.ts", "BBBB").await;

        let sink = Arc::new(MemorySink::default());
        let mut session = factory(cache()).create();
        let url = format!("{}/vod.m3u8", server.uri());
        let mut rx = session.attach(&url, sink.clone());
        assert_eq!(next_event(&mut rx).await, EngineEvent::ManifestParsed { levels: 1 });

        // Same URL, new binding: the old loader must not feed it.
        sink.set_source(MediaSource::adaptive(&url));
        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        assert_eq!(sink.chunks_appended(), 0);
        session.destroy();
    }
}
