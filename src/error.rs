//! Error types for the narration engine

use thiserror::Error;

/// Result type alias for narration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the narration engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Text-to-speech endpoint error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio download error
    #[error("download error: {0}")]
    Download(String),

    /// Playback of a narration job failed
    #[error("playback error: {0}")]
    Playback(String),

    /// Transcript lookup error
    #[error("transcript error: {0}")]
    Transcript(String),

    /// Narration discarded by a force stop
    #[error("narration cancelled")]
    Cancelled,

    /// Playback stopped before it reached the end
    #[error("narration interrupted")]
    Interrupted,

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
}
