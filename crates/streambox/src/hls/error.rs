use reqwest::StatusCode;

use crate::engine::{EngineError, ErrorDetails, ErrorKind};
use crate::sink::SinkError;

#[derive(Debug, thiserror::Error)]
pub enum HlsError {
    #[error("loading cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request for {url} failed with HTTP {status}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("request for {url} timed out")]
    Timeout { url: String },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("media sink rejected data: {source}")]
    Sink {
        #[from]
        source: SinkError,
    },
}

impl HlsError {
    pub fn invalid_url(input: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.to_string(),
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    /// Classify a transport error for `url`, separating timeouts.
    pub fn from_request(error: reqwest::Error, url: &str) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network { source: error }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { source } => {
                source.is_connect() || source.is_request() || source.is_body() || source.is_decode()
            }
            Self::HttpStatus { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
            Self::Timeout { .. } => true,
            Self::Cancelled | Self::InvalidUrl { .. } | Self::Playlist { .. } | Self::Sink { .. } => {
                false
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Which request an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Manifest,
    Level,
    Fragment,
}

impl Stage {
    pub(crate) fn details(self, error: &HlsError) -> ErrorDetails {
        match (self, error) {
            (Self::Manifest, HlsError::Timeout { .. }) => ErrorDetails::ManifestLoadTimeout,
            (Self::Manifest, HlsError::Playlist { .. }) => ErrorDetails::ManifestParsingError,
            (Self::Manifest, _) => ErrorDetails::ManifestLoadError,
            (Self::Level, HlsError::Timeout { .. }) => ErrorDetails::LevelLoadTimeout,
            (Self::Level, _) => ErrorDetails::LevelLoadError,
            (Self::Fragment, HlsError::Timeout { .. }) => ErrorDetails::FragLoadTimeout,
            (Self::Fragment, _) => ErrorDetails::FragLoadError,
        }
    }

    /// Engine error for a failed request at this stage. Fragment failures
    /// are skipped and therefore never fatal.
    pub(crate) fn engine_error(self, error: &HlsError) -> EngineError {
        let details = self.details(error);
        match self {
            Self::Fragment => EngineError::non_fatal(ErrorKind::Network, details, error.to_string()),
            _ => EngineError::fatal(ErrorKind::Network, details, error.to_string()),
        }
    }
}
