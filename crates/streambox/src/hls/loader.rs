use std::sync::Arc;
use std::time::Duration;

use m3u8_rs::{MediaPlaylist, Playlist};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::error::Stage;
use super::playlist::{self, select_variant};
use super::retry::{RetryPolicy, with_retry};
use super::HlsError;
use crate::config::HlsEngineConfig;
use crate::engine::{EngineError, EngineEvent, ErrorDetails, ErrorKind};
use crate::prefetch::ManifestCache;
use crate::sink::{MediaSink, SinkError, SourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    StartLoad,
    RecoverMedia,
}

/// Where to pick up after a decoder reset.
#[derive(Debug, Clone)]
struct Resume {
    media_url: Url,
    next_sequence: u64,
}

enum Plan {
    Load { use_cache: bool },
    Resume(Resume),
}

enum Stop {
    Cancelled,
    Restart,
    Fatal {
        error: EngineError,
        resume: Option<Resume>,
    },
}

impl Stop {
    fn fatal(stage: Stage, error: HlsError, resume: Option<Resume>) -> Self {
        match error {
            HlsError::Cancelled => Self::Cancelled,
            error => Self::Fatal {
                error: stage.engine_error(&error),
                resume,
            },
        }
    }
}

/// Background task behind one [`HlsSession`](super::HlsSession).
pub(crate) struct Loader {
    pub(crate) client: Client,
    pub(crate) config: Arc<HlsEngineConfig>,
    pub(crate) cache: ManifestCache,
    pub(crate) url: String,
    pub(crate) sink: Arc<dyn MediaSink>,
    pub(crate) source: SourceId,
    pub(crate) events: mpsc::UnboundedSender<EngineEvent>,
    pub(crate) token: CancellationToken,
}

impl Loader {
    pub(crate) async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut plan = Plan::Load { use_cache: true };
        loop {
            let result = match plan {
                Plan::Load { use_cache } => self.load(use_cache, &mut commands).await,
                Plan::Resume(resume) => {
                    self.stream(resume.media_url, None, Some(resume.next_sequence), &mut commands)
                        .await
                }
            };

            plan = match result {
                Ok(()) => {
                    info!(url = %self.url, "HLS stream ended");
                    return;
                }
                Err(Stop::Cancelled) => return,
                Err(Stop::Restart) => Plan::Load { use_cache: false },
                Err(Stop::Fatal { error, resume }) => {
                    warn!(url = %self.url, error = %error, "HLS loading stopped");
                    self.emit(EngineEvent::Error(error));
                    let command = tokio::select! {
                        _ = self.token.cancelled() => None,
                        command = commands.recv() => command,
                    };
                    match (command, resume) {
                        (None, _) => return,
                        (Some(Command::RecoverMedia), Some(resume)) => {
                            self.sink.reset_decoder(self.source);
                            Plan::Resume(resume)
                        }
                        (Some(Command::RecoverMedia), None) => {
                            self.sink.reset_decoder(self.source);
                            Plan::Load { use_cache: false }
                        }
                        (Some(Command::StartLoad), _) => Plan::Load { use_cache: false },
                    }
                }
            };
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn policy(&self, max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            self.config.retry_base_delay,
            self.config.retry_max_delay,
        )
    }

    async fn get(&self, url: &Url, timeout: Duration, max_retries: u32) -> Result<bytes::Bytes, HlsError> {
        let policy = self.policy(max_retries);
        with_retry(&policy, &self.token, |_| {
            playlist::fetch(&self.client, url, timeout, &self.config.user_agent)
        })
        .await
    }

    async fn load(
        &self,
        use_cache: bool,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<(), Stop> {
        let manifest_url = Url::parse(&self.url)
            .map_err(|e| Stop::fatal(Stage::Manifest, HlsError::invalid_url(&self.url, e), None))?;

        let cached = if use_cache {
            self.cache.take(manifest_url.as_str()).await
        } else {
            None
        };
        let body = match cached {
            Some(body) => {
                debug!(url = %manifest_url, "Using prefetched manifest");
                body
            }
            None => self
                .get(
                    &manifest_url,
                    self.config.manifest_loading_timeout,
                    self.config.manifest_loading_max_retry,
                )
                .await
                .map_err(|e| Stop::fatal(Stage::Manifest, e, None))?,
        };

        let (media_url, media, levels) =
            match playlist::parse(&body).map_err(|e| Stop::fatal(Stage::Manifest, e, None))? {
                Playlist::MediaPlaylist(media) => (manifest_url, media, 1),
                Playlist::MasterPlaylist(master) => {
                    let variant = select_variant(&master, &self.config.variant_selection)
                        .ok_or_else(|| {
                            Stop::fatal(
                                Stage::Manifest,
                                HlsError::playlist("master playlist has no playable variants"),
                                None,
                            )
                        })?;
                    let media_url = playlist::resolve(&manifest_url, &variant.uri)
                        .map_err(|e| Stop::fatal(Stage::Manifest, e, None))?;
                    debug!(
                        variant = %media_url,
                        bandwidth = variant.bandwidth,
                        "Selected HLS variant"
                    );
                    let media = self.load_level(&media_url, None).await?;
                    (media_url, media, master.variants.len())
                }
            };

        self.emit(EngineEvent::ManifestParsed { levels });
        self.stream(media_url, Some(media), None, commands).await
    }

    async fn load_level(&self, url: &Url, resume: Option<Resume>) -> Result<MediaPlaylist, Stop> {
        let body = self
            .get(
                url,
                self.config.level_loading_timeout,
                self.config.level_loading_max_retry,
            )
            .await
            .map_err(|e| Stop::fatal(Stage::Level, e, resume.clone()))?;
        playlist::parse_media(&body).map_err(|e| Stop::fatal(Stage::Level, e, resume))
    }

    /// Feed segments into the sink, reloading the level until it ends.
    async fn stream(
        &self,
        media_url: Url,
        initial: Option<MediaPlaylist>,
        mut next_sequence: Option<u64>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<(), Stop> {
        let mut current = initial;
        loop {
            let resume = next_sequence.map(|next_sequence| Resume {
                media_url: media_url.clone(),
                next_sequence,
            });
            let media = match current.take() {
                Some(media) => media,
                None => self.load_level(&media_url, resume).await?,
            };

            let first = media.media_sequence;
            let start = next_sequence
                .unwrap_or(first + playlist::start_index(&media, self.config.live_sync_segment_count) as u64);

            for (offset, segment) in media.segments.iter().enumerate() {
                let sequence = first + offset as u64;
                if sequence < start {
                    continue;
                }
                self.check_commands(commands)?;

                let segment_url = match playlist::resolve(&media_url, &segment.uri) {
                    Ok(url) => url,
                    Err(e) => {
                        self.emit(EngineEvent::Error(Stage::Fragment.engine_error(&e)));
                        next_sequence = Some(sequence + 1);
                        continue;
                    }
                };
                let data = match self
                    .get(
                        &segment_url,
                        self.config.frag_loading_timeout,
                        self.config.frag_loading_max_retry,
                    )
                    .await
                {
                    Ok(data) => data,
                    Err(HlsError::Cancelled) => return Err(Stop::Cancelled),
                    Err(e) => {
                        warn!(segment = %segment_url, error = %e, "Skipping segment");
                        self.emit(EngineEvent::Error(Stage::Fragment.engine_error(&e)));
                        next_sequence = Some(sequence + 1);
                        continue;
                    }
                };

                if self.token.is_cancelled() {
                    return Err(Stop::Cancelled);
                }
                let bytes = data.len();
                match self.sink.append(self.source, data) {
                    Ok(()) => {}
                    Err(SinkError::Detached) => {
                        debug!(url = %self.url, "Sink rebound to another source");
                        return Err(Stop::Cancelled);
                    }
                    Err(e) => return Err(Stop::Fatal {
                        error: EngineError::fatal(
                            ErrorKind::Media,
                            ErrorDetails::BufferAppendError,
                            e.to_string(),
                        ),
                        resume: Some(Resume {
                            media_url: media_url.clone(),
                            next_sequence: sequence + 1,
                        }),
                    }),
                }
                trace!(sequence, bytes, "Segment appended");
                self.emit(EngineEvent::FragmentBuffered { sequence, bytes });
                next_sequence = Some(sequence + 1);
            }

            if media.end_list {
                self.sink.end_of_stream(self.source);
                return Ok(());
            }
            if next_sequence.is_none() {
                next_sequence = Some(first + media.segments.len() as u64);
            }

            let delay = playlist::refresh_interval(
                &media,
                self.config.low_latency,
                self.config.min_refresh_interval,
            );
            self.idle(delay, commands).await?;
        }
    }

    fn check_commands(&self, commands: &mut mpsc::UnboundedReceiver<Command>) -> Result<(), Stop> {
        if self.token.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        while let Ok(command) = commands.try_recv() {
            self.apply_command(command)?;
        }
        Ok(())
    }

    fn apply_command(&self, command: Command) -> Result<(), Stop> {
        match command {
            Command::StartLoad => Err(Stop::Restart),
            Command::RecoverMedia => {
                self.sink.reset_decoder(self.source);
                Ok(())
            }
        }
    }

    async fn idle(
        &self,
        delay: Duration,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<(), Stop> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(Stop::Cancelled),
                command = commands.recv() => match command {
                    Some(command) => self.apply_command(command)?,
                    None => return Err(Stop::Cancelled),
                },
                _ = &mut sleep => return Ok(()),
            }
        }
    }
}
