use std::path::{Path, PathBuf};
use std::sync::Arc;

use m3u::{Channel, ChannelCatalog, DEFAULT_PLAYLIST_URL};
use reqwest::Client;
use streambox_engine::{
    ActivityStore, FileSink, LocalActivityStore, PlayerConfig, SessionEvent, SessionStatus,
    StreamBox,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

pub struct ListOptions {
    pub playlist: Option<String>,
    pub group: Option<String>,
    pub limit: Option<usize>,
    pub json: bool,
}

pub struct PlayOptions {
    pub url: Option<String>,
    pub channel: Option<String>,
    pub playlist: Option<String>,
    pub output: PathBuf,
    pub config: Option<PathBuf>,
    pub activity: Option<PathBuf>,
}

async fn fetch_catalog(client: &Client, playlist: Option<String>) -> Result<Vec<Channel>> {
    let url = playlist.unwrap_or_else(|| DEFAULT_PLAYLIST_URL.to_string());
    let channels = ChannelCatalog::new(client.clone(), url).fetch_channels().await?;
    info!(count = channels.len(), "Catalog loaded");
    Ok(channels)
}

pub async fn list(client: &Client, options: ListOptions) -> Result<()> {
    let channels = fetch_catalog(client, options.playlist).await?;
    let selected: Vec<Channel> = channels
        .into_iter()
        .filter(|c| {
            options
                .group
                .as_deref()
                .is_none_or(|g| c.group.eq_ignore_ascii_case(g))
        })
        .take(options.limit.unwrap_or(usize::MAX))
        .collect();

    if options.json {
        let json = serde_json::to_string_pretty(&selected)
            .map_err(|e| AppError::InvalidInput(format!("Cannot encode channels: {e}")))?;
        println!("{json}");
        return Ok(());
    }

    for channel in &selected {
        println!("{:<20} {:<40} {}", channel.group, channel.name, channel.url);
    }
    Ok(())
}

async fn load_config(path: Option<&Path>) -> Result<PlayerConfig> {
    let Some(path) = path else {
        return Ok(PlayerConfig::default());
    };
    let json = tokio::fs::read_to_string(path).await?;
    let config = PlayerConfig::from_json_str(&json)?;
    debug!(path = %path.display(), "Loaded player configuration");
    Ok(config)
}

async fn resolve_channel(client: &Client, options: &PlayOptions) -> Result<Channel> {
    if let Some(url) = &options.url {
        return Ok(Channel::new(url.clone(), url.clone()));
    }
    let Some(name) = &options.channel else {
        return Err(AppError::InvalidInput("either a URL or --channel is required".into()));
    };
    fetch_catalog(client, options.playlist.clone())
        .await?
        .into_iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| AppError::InvalidInput(format!("no channel named '{name}' in the catalog")))
}

pub async fn play(client: &Client, options: PlayOptions) -> Result<()> {
    let config = load_config(options.config.as_deref()).await?;
    let channel = resolve_channel(client, &options).await?;

    let activity: Arc<dyn ActivityStore> = match &options.activity {
        Some(path) => Arc::new(LocalActivityStore::open(path).await?),
        None => Arc::new(LocalActivityStore::in_memory()),
    };

    let sink = Arc::new(FileSink::new(options.output.clone(), client.clone()));
    let player = StreamBox::builder(sink.clone())
        .config(config)
        .client(client.clone())
        .activity(Arc::clone(&activity))
        .build()?;

    let mut status = player.session().watch_status();
    let mut events = player.session().subscribe();
    player.select_channel(&channel).await?;
    info!(channel = %channel.name, output = %options.output.display(), "Playback started");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping playback");
                break Ok(());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = *status.borrow_and_update();
                match current {
                    SessionStatus::TimedOut | SessionStatus::Error(_) => {
                        break Err(AppError::Playback(current.to_string()));
                    }
                    SessionStatus::Playing => info!("Playing"),
                    other => debug!(status = %other, "Session status changed"),
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Ended) => {
                    info!("Stream ended");
                    break Ok(());
                }
                Ok(SessionEvent::Recovering { fault, attempt }) => {
                    warn!(fault = ?fault, attempt, "Recovering playback");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Session events lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    player.close();
    sink.sync().await;
    info!(bytes = sink.bytes_written(), path = %sink.path().display(), "Recording closed");
    outcome
}
