//! Media sinks: the audio/video output a session plays into.
//!
//! A sink has exactly one source binding at a time. The session controller
//! (and the adaptive engine it owns) is the only writer of that binding;
//! overlay and caption components observe the sink through
//! [`MediaSink::subscribe`] and only call the user-intent methods
//! (`play`, `pause`, `set_volume`, `set_fullscreen`).

mod file;
mod memory;

pub use file::FileSink;
pub use memory::{MemorySink, MemorySinkOptions};

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::broadcast;

/// Capacity of the per-sink event broadcast channel.
pub const SINK_EVENT_CAPACITY: usize = 64;

/// Identity of one adaptive binding.
///
/// Every attach takes a fresh id; a sink drops appends carrying an id it is
/// no longer bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a sink is currently bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// A URL opened directly by the sink.
    Progressive(String),
    /// An HLS URL handed to a sink with built-in HLS support.
    Native(String),
    /// Fed chunk by chunk by an adaptive engine through [`MediaSink::append`].
    Adaptive { url: String, id: SourceId },
}

impl MediaSource {
    /// A new adaptive binding for `url`.
    pub fn adaptive(url: impl Into<String>) -> Self {
        Self::Adaptive {
            url: url.into(),
            id: SourceId::next(),
        }
    }

    pub fn adaptive_id(&self) -> Option<SourceId> {
        match self {
            Self::Adaptive { id, .. } => Some(*id),
            _ => None,
        }
    }


    pub fn url(&self) -> &str {
        match self {
            Self::Progressive(url) | Self::Native(url) | Self::Adaptive { url, .. } => url,
        }
    }
}

/// Signals emitted by a sink, mirroring media element events.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Play,
    Pause,
    /// Playback actually started or resumed after buffering.
    Playing,
    /// Playback stalled waiting for data.
    Waiting,
    VolumeChanged(f64),
    FullscreenChanged(bool),
    Error(String),
    Ended,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("no source is attached")]
    NoSource,

    #[error("the adaptive source this data belongs to was replaced")]
    Detached,

    #[error("playback was not allowed: {reason}")]
    NotAllowed { reason: String },

    #[error("{feature} is not supported by this sink")]
    Unsupported { feature: &'static str },

    #[error("failed to append media data: {reason}")]
    Append { reason: String },
}

impl SinkError {
    pub fn not_allowed(reason: impl Into<String>) -> Self {
        Self::NotAllowed {
            reason: reason.into(),
        }
    }

    pub fn append(reason: impl Into<String>) -> Self {
        Self::Append {
            reason: reason.into(),
        }
    }
}

/// The platform audio/video output primitive.
pub trait MediaSink: Send + Sync {
    /// Bind a new source, replacing any previous one.
    fn set_source(&self, source: MediaSource);

    /// Detach and blank the current source.
    fn clear_source(&self);

    fn source(&self) -> Option<MediaSource>;

    /// Whether the sink can play the given MIME type without help.
    fn can_play_type(&self, mime: &str) -> bool;

    /// Push a media chunk for the adaptive binding `source`. Fails with
    /// [`SinkError::Detached`] once the sink is bound to anything else.
    fn append(&self, source: SourceId, chunk: Bytes) -> Result<(), SinkError>;

    /// Reset the decoder after a media fault, keeping the source binding.
    fn reset_decoder(&self, _source: SourceId) {}

    /// Signal that the adaptive engine has delivered the final chunk.
    fn end_of_stream(&self, _source: SourceId) {}

    fn play(&self) -> Result<(), SinkError>;

    fn pause(&self);

    fn is_paused(&self) -> bool;

    fn volume(&self) -> f64;

    /// Set output volume, clamped to `0.0..=1.0`.
    fn set_volume(&self, volume: f64);

    fn is_fullscreen(&self) -> bool {
        false
    }

    fn set_fullscreen(&self, _fullscreen: bool) -> Result<(), SinkError> {
        Err(SinkError::Unsupported {
            feature: "fullscreen",
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<SinkEvent>;
}
