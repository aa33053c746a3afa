use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("playlist request to {url} failed with HTTP {status}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("playlist parsing task failed: {reason}")]
    Parse { reason: String },
}

impl CatalogError {
    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }
}
