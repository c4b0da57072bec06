//! Session counters and the notices shown to the user

use std::fmt;

use crate::Error;

/// Counters for one voice session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Fixed-size frames produced by the capture pipeline
    pub frames_captured: u64,

    /// Frames handed to the connection
    pub frames_sent: u64,

    /// Frames produced outside the active window
    pub frames_dropped: u64,

    /// Outbound PCM bytes
    pub bytes_sent: u64,

    /// Inbound PCM bytes accepted for playback
    pub bytes_received: u64,

    /// Inbound buffers enqueued for playback
    pub buffers_enqueued: u64,

    /// Barge-in interruptions
    pub interruptions: u64,

    /// Inbound payloads discarded as undecodable
    pub malformed_payloads: u64,

    /// Inbound control messages
    pub control_messages: u64,
}

/// User-visible outcome of a session transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Connection is live
    Connected,
    /// Microphone access refused
    PermissionDenied,
    /// No usable audio device
    DeviceUnavailable(String),
    /// Connection did not become active in time
    HandshakeTimeout,
    /// Connection failed or closed unexpectedly
    TransportError(String),
    /// Remote side ended the session normally
    Ended,
}

impl Notice {
    /// Notice for an error that ended a session
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::PermissionDenied => Self::PermissionDenied,
            Error::DeviceUnavailable(detail) | Error::Audio(detail) => {
                Self::DeviceUnavailable(detail.clone())
            }
            Error::HandshakeTimeout(_) => Self::HandshakeTimeout,
            Error::Transport(detail) => Self::TransportError(detail.clone()),
            other => Self::TransportError(other.to_string()),
        }
    }

    /// Whether the notice reports a failure
    #[must_use]
    pub const fn is_error(&self) -> bool {
        !matches!(self, Self::Connected | Self::Ended)
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected, start talking."),
            Self::PermissionDenied => write!(
                f,
                "Microphone access denied. Please allow microphone access and try again."
            ),
            Self::DeviceUnavailable(detail) => write!(f, "No usable audio device ({detail})."),
            Self::HandshakeTimeout => {
                write!(f, "The voice service did not respond in time. Please try again.")
            }
            Self::TransportError(detail) => write!(f, "Connection lost ({detail})."),
            Self::Ended => write!(f, "Conversation ended."),
        }
    }
}
