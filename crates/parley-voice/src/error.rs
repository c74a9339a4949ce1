use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),

    #[error("upstream connect failed: {0}")]
    Connect(String),

    #[error("upstream connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("upstream connection closed")]
    UpstreamClosed,

    #[error("wire serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
