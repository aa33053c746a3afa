use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PlayerError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// How long a freshly started session may stay in `Buffering` before it is
/// declared dead.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(15);

/// Serde adapter storing a [`Duration`] as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Top-level configuration for a StreamBox player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Dead-stream watchdog duration for the initial connection attempt.
    #[serde(with = "duration_ms")]
    pub watchdog_timeout: Duration,
    /// Maximum decoder recoveries per request. `None` retries indefinitely.
    pub media_recovery_limit: Option<u32>,
    pub hls: HlsEngineConfig,
    pub prefetch: PrefetchConfig,
    pub captions: CaptionConfig,
    pub overlay: OverlayConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            media_recovery_limit: None,
            hls: HlsEngineConfig::default(),
            prefetch: PrefetchConfig::default(),
            captions: CaptionConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Parse a JSON document; omitted fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, PlayerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PlayerError::configuration(format!("invalid player config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.watchdog_timeout.is_zero() {
            return Err(PlayerError::configuration(
                "watchdog_timeout must be greater than zero",
            ));
        }
        if self.hls.retry_base_delay > self.hls.retry_max_delay {
            return Err(PlayerError::configuration(
                "hls.retry_base_delay must not exceed hls.retry_max_delay",
            ));
        }
        Ok(())
    }

    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    pub fn with_media_recovery_limit(mut self, limit: Option<u32>) -> Self {
        self.media_recovery_limit = limit;
        self
    }
}

/// Rendition choice when a master playlist offers several variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantSelectionPolicy {
    #[default]
    HighestBitrate,
    LowestBitrate,
    /// Variant whose bandwidth is closest to the given bits per second.
    ClosestToBitrate(u64),
    /// Exact resolution match, falling back to the highest bitrate.
    MatchingResolution { width: u64, height: u64 },
}

/// Loader settings for the built-in HLS engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsEngineConfig {
    #[serde(with = "duration_ms")]
    pub manifest_loading_timeout: Duration,
    pub manifest_loading_max_retry: u32,
    #[serde(with = "duration_ms")]
    pub level_loading_timeout: Duration,
    pub level_loading_max_retry: u32,
    #[serde(with = "duration_ms")]
    pub frag_loading_timeout: Duration,
    pub frag_loading_max_retry: u32,
    /// Base delay for exponential backoff between attempts.
    #[serde(with = "duration_ms")]
    pub retry_base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub retry_max_delay: Duration,
    /// Number of segments behind the live edge to start from.
    pub live_sync_segment_count: usize,
    /// Refresh live playlists at half the target duration.
    pub low_latency: bool,
    #[serde(with = "duration_ms")]
    pub min_refresh_interval: Duration,
    pub variant_selection: VariantSelectionPolicy,
    pub user_agent: String,
}

impl Default for HlsEngineConfig {
    fn default() -> Self {
        Self {
            manifest_loading_timeout: Duration::from_secs(10),
            manifest_loading_max_retry: 2,
            level_loading_timeout: Duration::from_secs(10),
            level_loading_max_retry: 2,
            frag_loading_timeout: Duration::from_secs(20),
            frag_loading_max_retry: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(8),
            live_sync_segment_count: 3,
            low_latency: true,
            min_refresh_interval: Duration::from_millis(500),
            variant_selection: VariantSelectionPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

/// Manifest prefetch on hover/focus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    pub enabled: bool,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Lifetime of a warmed manifest. Live playlists go stale quickly.
    #[serde(with = "duration_ms")]
    pub cache_ttl: Duration,
    pub max_entries: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(10),
            max_entries: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    pub language: String,
    /// Delay before a finalised caption is cleared from the screen.
    #[serde(with = "duration_ms")]
    pub clear_after: Duration,
    pub interim_results: bool,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            clear_after: Duration::from_secs(3),
            interim_results: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Idle time after which full-screen controls are hidden.
    #[serde(with = "duration_ms")]
    pub controls_hide_after: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            controls_hide_after: Duration::from_secs(3),
        }
    }
}
