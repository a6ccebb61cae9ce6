//! Error types for the Lucero chat client.

/// Top-level error type for the chat client.
///
/// Only [`ChatError::TurnInProgress`] and [`ChatError::EmptyMessage`] ever
/// reach a caller of the conversation; every other variant is recovered
/// inside the turn that produced it and only shows up in the logs.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Malformed base64 audio payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// Chat or speech service call failed.
    #[error("remote call error: {0}")]
    Remote(String),

    /// Key/value store read or write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Audio output device or stream error.
    #[error("playback error: {0}")]
    Playback(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A submit arrived while another turn was still in flight.
    #[error("a turn is already in progress")]
    TurnInProgress,

    /// A submit carried no text after trimming.
    #[error("message is empty")]
    EmptyMessage,
}

impl From<base64::DecodeError> for ChatError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        Self::Remote(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChatError>;
