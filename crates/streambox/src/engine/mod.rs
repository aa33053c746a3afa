//! Adaptive-bitrate engine capability.
//!
//! The session controller never talks to an HLS implementation directly. It
//! asks an [`EngineFactory`] for a fresh [`AdaptiveSession`], attaches it to
//! a sink and consumes the [`EngineEvent`]s it reports. Recovery is driven
//! through the two primitives every engine provides: [`AdaptiveSession::start_load`]
//! (re-fetch without teardown) and [`AdaptiveSession::recover_media_error`]
//! (decoder reset).

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::sink::MediaSink;

/// Receiving side of an engine's event stream.
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Broad category of an engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Media,
    Key,
    Mux,
    Other,
}

/// Specific failure reported alongside an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDetails {
    ManifestLoadError,
    ManifestLoadTimeout,
    ManifestParsingError,
    LevelLoadError,
    LevelLoadTimeout,
    FragLoadError,
    FragLoadTimeout,
    BufferAppendError,
    BufferStalledError,
    KeyLoadError,
    Internal,
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ManifestLoadError => "manifestLoadError",
            Self::ManifestLoadTimeout => "manifestLoadTimeOut",
            Self::ManifestParsingError => "manifestParsingError",
            Self::LevelLoadError => "levelLoadError",
            Self::LevelLoadTimeout => "levelLoadTimeOut",
            Self::FragLoadError => "fragLoadError",
            Self::FragLoadTimeout => "fragLoadTimeOut",
            Self::BufferAppendError => "bufferAppendError",
            Self::BufferStalledError => "bufferStalledError",
            Self::KeyLoadError => "keyLoadError",
            Self::Internal => "internalException",
        };
        f.write_str(name)
    }
}

/// An error reported by an adaptive engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// Whether the engine stopped making progress on its own.
    pub fatal: bool,
    pub kind: ErrorKind,
    pub details: ErrorDetails,
    pub reason: String,
}

impl EngineError {
    pub fn fatal(kind: ErrorKind, details: ErrorDetails, reason: impl Into<String>) -> Self {
        Self {
            fatal: true,
            kind,
            details,
            reason: reason.into(),
        }
    }

    pub fn non_fatal(kind: ErrorKind, details: ErrorDetails, reason: impl Into<String>) -> Self {
        Self {
            fatal: false,
            kind,
            details,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} error ({}): {}",
            if self.fatal { "fatal" } else { "non-fatal" },
            self.kind,
            self.details,
            self.reason
        )
    }
}

/// Lifecycle signals from an adaptive session.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The manifest was loaded and a rendition chosen; playback may start.
    ManifestParsed { levels: usize },
    /// A media segment was handed to the sink.
    FragmentBuffered { sequence: u64, bytes: usize },
    Error(EngineError),
}

/// One adaptive-bitrate session bound to one sink.
pub trait AdaptiveSession: Send {
    /// Start loading `url` into `sink`. Called at most once per session.
    fn attach(&mut self, url: &str, sink: Arc<dyn MediaSink>) -> EngineEventReceiver;

    /// Reload primitive: restart loading from the manifest without teardown.
    fn start_load(&self);

    /// Decoder reset after a media fault.
    fn recover_media_error(&self);

    /// Stop all loading and release the sink. Must be idempotent.
    fn destroy(&mut self);
}

/// Builds adaptive sessions for the session controller.
pub trait EngineFactory: Send + Sync {
    /// Whether software adaptive playback is available on this platform.
    fn is_supported(&self) -> bool {
        true
    }

    fn create(&self) -> Box<dyn AdaptiveSession>;
}

/// Factory for platforms without software adaptive playback.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedEngine;

impl EngineFactory for UnsupportedEngine {
    fn is_supported(&self) -> bool {
        false
    }

    fn create(&self) -> Box<dyn AdaptiveSession> {
        Box::new(DetachedSession)
    }
}

struct DetachedSession;

impl AdaptiveSession for DetachedSession {
    fn attach(&mut self, _url: &str, _sink: Arc<dyn MediaSink>) -> EngineEventReceiver {
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }

    fn start_load(&self) {}

    fn recover_media_error(&self) {}

    fn destroy(&mut self) {}
}
