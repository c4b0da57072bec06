//! Dattivox - Real-time voice streaming client
//!
//! This library provides the streaming core of the Dattivox voice assistant:
//! - Microphone capture to fixed-size 16 kHz mono PCM frames
//! - Duplex WebSocket transport to the remote inference service
//! - Gapless playback of synthesized speech with barge-in interruption
//! - An explicit session object with idempotent start/stop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 SessionController                    │
//! │         start  │  stop  │  shutdown commands         │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   VoiceSession                       │
//! │  Capture ─▶ Interrupt ─▶ Transport ─▶ Playback       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Devices and network                     │
//! │   Microphone  │  Speaker  │  WebSocket               │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{
    ControllerHandle, EventBus, Notice, SessionController, SessionState, SessionStats,
    VoiceSession,
};
pub use transport::{Dialer, WireMessage, WsDialer};
pub use voice::{CpalMicrophone, CpalSpeaker, Microphone, PlaybackEngine, Speaker};
