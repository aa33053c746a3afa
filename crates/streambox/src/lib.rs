//! # streambox-engine
//!
//! Playback core for live TV channel lists: a session controller that owns
//! exactly one playback pipeline at a time, a built-in HLS engine, manifest
//! prefetch on hover, overlay presentation state, live captions and a local
//! activity store.
//!
//! ```no_run
//! use std::sync::Arc;
//! use streambox_engine::{Channel, MemorySink, StreamBox};
//!
//! # async fn demo() -> Result<(), streambox_engine::PlayerError> {
//! let sink = Arc::new(MemorySink::default());
//! let player = StreamBox::builder(sink).build()?;
//! player
//!     .select_channel(&Channel::new("Channel One", "https://x/one.m3u8"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod captions;
pub mod config;
pub mod engine;
pub mod error;
pub mod hls;
pub mod overlay;
pub mod player;
pub mod prefetch;
pub mod request;
pub mod session;
pub mod sink;

pub use activity::{ActivityError, ActivityStore, ChannelActivity, LocalActivityStore, Review};
pub use captions::{CaptionEngine, SpeechRecognizer};
pub use config::PlayerConfig;
pub use engine::{AdaptiveSession, EngineError, EngineEvent, EngineFactory};
pub use error::PlayerError;
pub use hls::{HlsEngineFactory, HlsError};
pub use overlay::{DisplayMode, OverlayController, OverlayState};
pub use player::{StreamBox, StreamBoxBuilder};
pub use prefetch::{ManifestCache, ManifestPrefetcher};
pub use request::{PlaybackRequest, SourceKind};
pub use session::{FailureReason, SessionController, SessionEvent, SessionStatus};
pub use sink::{FileSink, MediaSink, MediaSource, MemorySink, SinkError, SinkEvent, SourceId};

pub use m3u::{Channel, ChannelCatalog};
