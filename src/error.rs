//! Error types for Salin

use thiserror::Error;

/// Result type alias for Salin operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the translation client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, invalid setting)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed base64 audio payload
    #[error("decode error: {0}")]
    Decode(String),

    /// PCM byte layout does not match the requested format
    #[error("format error: {0}")]
    Format(String),

    /// Remote session transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Wake word recognizer error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
