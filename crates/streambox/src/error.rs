use crate::activity::ActivityError;
use crate::sink::SinkError;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("invalid playback request: {reason}")]
    InvalidRequest { reason: String },

    #[error("media sink error: {source}")]
    Sink {
        #[from]
        source: SinkError,
    },

    #[error("activity store error: {source}")]
    Activity {
        #[from]
        source: ActivityError,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl PlayerError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}
