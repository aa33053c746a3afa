use std::time::Duration;

use bytes::Bytes;
use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist, VariantStream, parse_playlist_res};
use reqwest::Client;
use reqwest::header::USER_AGENT;
use url::Url;

use super::HlsError;
use crate::config::VariantSelectionPolicy;

/// GET a playlist or segment body, classifying failures.
pub(crate) async fn fetch(
    client: &Client,
    url: &Url,
    timeout: Duration,
    user_agent: &str,
) -> Result<Bytes, HlsError> {
    let response = client
        .get(url.clone())
        .timeout(timeout)
        .header(USER_AGENT, user_agent)
        .send()
        .await
        .map_err(|e| HlsError::from_request(e, url.as_str()))?;
    if !response.status().is_success() {
        return Err(HlsError::HttpStatus {
            status: response.status(),
            url: url.to_string(),
        });
    }
    response
        .bytes()
        .await
        .map_err(|e| HlsError::from_request(e, url.as_str()))
}

pub(crate) fn parse(bytes: &[u8]) -> Result<Playlist, HlsError> {
    parse_playlist_res(bytes).map_err(|e| HlsError::playlist(format!("failed to parse playlist: {e}")))
}

pub(crate) fn parse_media(bytes: &[u8]) -> Result<MediaPlaylist, HlsError> {
    match parse(bytes)? {
        Playlist::MediaPlaylist(playlist) => Ok(playlist),
        Playlist::MasterPlaylist(_) => Err(HlsError::playlist(
            "expected a media playlist, got a master playlist",
        )),
    }
}

/// Resolve a playlist-relative URI.
pub(crate) fn resolve(base: &Url, uri: &str) -> Result<Url, HlsError> {
    base.join(uri).map_err(|e| HlsError::invalid_url(uri, e))
}

/// Pick the rendition to play. I-frame only variants are never chosen.
pub fn select_variant<'a>(
    master: &'a MasterPlaylist,
    policy: &VariantSelectionPolicy,
) -> Option<&'a VariantStream> {
    let mut playable = master.variants.iter().filter(|v| !v.is_i_frame);
    match policy {
        VariantSelectionPolicy::HighestBitrate => playable.max_by_key(|v| v.bandwidth),
        VariantSelectionPolicy::LowestBitrate => playable.min_by_key(|v| v.bandwidth),
        VariantSelectionPolicy::ClosestToBitrate(target) => {
            playable.min_by_key(|v| v.bandwidth.abs_diff(*target))
        }
        VariantSelectionPolicy::MatchingResolution { width, height } => {
            let candidates: Vec<_> = playable.collect();
            candidates
                .iter()
                .find(|v| {
                    v.resolution
                        .is_some_and(|r| r.width == *width && r.height == *height)
                })
                .or_else(|| candidates.iter().max_by_key(|v| v.bandwidth))
                .copied()
        }
    }
}

/// Index of the first segment to load. Live playlists start
/// `sync_count` segments behind the edge; finished ones from the start.
pub fn start_index(playlist: &MediaPlaylist, sync_count: usize) -> usize {
    if playlist.end_list {
        0
    } else {
        playlist.segments.len().saturating_sub(sync_count.max(1))
    }
}

/// Delay before the next reload of a live media playlist.
pub fn refresh_interval(playlist: &MediaPlaylist, low_latency: bool, floor: Duration) -> Duration {
    let target = Duration::from_secs(playlist.target_duration);
    let interval = if low_latency { target / 2 } else { target };
    interval.max(floor)
}
