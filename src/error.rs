use std::io;

/// All error types for the tileset streamer.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("Source error: {0}")]
    Source(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Registry error: {0}")]
    Registry(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamError>;
