use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Player error: {0}")]
    Player(#[from] streambox_engine::PlayerError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] m3u::CatalogError),

    #[error("Activity error: {0}")]
    Activity(#[from] streambox_engine::ActivityError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
