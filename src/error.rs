//! Error types for the Dattivox voice client

use std::time::Duration;

use thiserror::Error;

/// Result type alias for voice client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone access refused by the user or the OS
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No usable audio device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Connection did not become active within the handshake bound
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Connection failure or abrupt close
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound message that is neither a control sentinel nor decodable PCM
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Audio stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Endpoint URL parsing error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Whether this error ends the session without leaving the rest of the client unusable
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied
                | Self::DeviceUnavailable(_)
                | Self::Audio(_)
                | Self::HandshakeTimeout(_)
                | Self::Transport(_)
        )
    }
}
