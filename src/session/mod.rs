//! Voice session lifecycle
//!
//! A [`VoiceSession`] owns everything one conversation needs: the capture
//! handle, the connection, the playback queue, and the [`SessionState`].
//! Collaborators report into a single [`EventBus`] and the session applies
//! those events one at a time, so capture blocks, inbound messages, and
//! playback completions never interleave mid-update.
//!
//! ```text
//! Idle ──start──▶ Connecting ──open/first message──▶ Active
//!  ▲                  │                                │
//!  │            timeout/error                    stop/close/error
//!  │                  ▼                                ▼
//!  └──────────────── Closing ◀─────────────────────────┘
//! ```

mod controller;
mod event;
mod machine;
mod stats;

use std::fmt;

pub use controller::{Command, ControllerHandle, SessionController};
pub use event::{Envelope, EventBus, EventSink, SessionEvent};
pub use machine::VoiceSession;
pub use stats::{Notice, SessionStats};

/// Lifecycle state of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection, no capture
    #[default]
    Idle,
    /// Microphone held, connection opening
    Connecting,
    /// Streaming in both directions
    Active,
    /// Tearing down
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}
