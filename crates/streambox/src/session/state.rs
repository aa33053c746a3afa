use std::fmt;

use crate::request::PlaybackRequest;

/// Why a request ended in [`SessionStatus::Error`] or [`SessionStatus::TimedOut`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    ConnectionRefused,
    StreamUnavailable,
    NativePlayback,
}

impl FailureReason {
    /// Message shown to the viewer.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Timeout => "Stream Timeout: This link may be dead or restricted.",
            Self::ConnectionRefused => {
                "Connection Refused: Resource might be offline or CORS blocked."
            }
            Self::StreamUnavailable => "Playback Error: This stream is currently unavailable.",
            Self::NativePlayback => "Native Player Error: Direct stream link failed.",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Playback status of the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Buffering,
    Playing,
    TimedOut,
    Error(FailureReason),
}

impl SessionStatus {
    /// `TimedOut` and `Error` end the current request; only a new
    /// `start_session` or `stop_session` leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Error(_))
    }

    /// The user-facing failure, if any.
    pub fn failure(&self) -> Option<FailureReason> {
        match self {
            Self::TimedOut => Some(FailureReason::Timeout),
            Self::Error(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Buffering => f.write_str("buffering"),
            Self::Playing => f.write_str("playing"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Error(reason) => write!(f, "error ({reason})"),
        }
    }
}

/// Automatic recoveries performed for the current request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounts {
    pub network: u32,
    pub media: u32,
}

/// Notifications published by the controller besides status changes.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// An engine fault was handled without surfacing it.
    Recovering { fault: super::Fault, attempt: u32 },
    /// The sink reached the end of the media.
    Ended,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub request: Option<PlaybackRequest>,
    pub retry_counts: RetryCounts,
    pub watchdog_armed: bool,
    pub adaptive_attached: bool,
}
