//! Duplex transport to the remote inference endpoint
//!
//! A [`Dialer`] opens one connection per session. The connection reports
//! lifecycle and inbound messages as [`TransportEvent`]s through the session's
//! event sink, and accepts outbound frames through a [`Connection`] handle.

mod websocket;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

pub use websocket::WsDialer;

use crate::session::EventSink;

/// Binary payloads at or below this size are checked for misclassified text
pub const SMALL_PAYLOAD_BYTES: usize = 64;

/// WebSocket close code for a normal closure
pub const NORMAL_CLOSE: u16 = 1000;

/// Unit exchanged over the duplex connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Control text such as the connection acknowledgment
    Text(String),
    /// Raw 16-bit little-endian PCM
    Binary(Vec<u8>),
}

/// How an inbound message should be handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Lifecycle sentinel, never forwarded to playback
    Control(String),
    /// Synthesized audio for the playback queue
    Audio(Vec<u8>),
}

impl WireMessage {
    /// Classify by framing type
    ///
    /// Text frames are control. Binary frames are audio, except short payloads
    /// that decode as printable UTF-8, which are treated as control text sent
    /// with the wrong framing.
    #[must_use]
    pub fn classify(self) -> Inbound {
        match self {
            Self::Text(text) => Inbound::Control(text),
            Self::Binary(bytes) => {
                if bytes.len() <= SMALL_PAYLOAD_BYTES {
                    if let Some(text) = as_printable_text(&bytes) {
                        return Inbound::Control(text.to_string());
                    }
                }
                Inbound::Audio(bytes)
            }
        }
    }
}

fn as_printable_text(bytes: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(bytes).ok()?;
    let printable = !text.trim().is_empty()
        && text.chars().all(|c| !c.is_control() || c.is_whitespace());
    printable.then_some(text)
}

/// Lifecycle and data events reported by a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established
    Opened,
    /// Inbound message
    Message(WireMessage),
    /// Remote side closed the connection
    Closed {
        /// Close code, if a close frame was received
        code: Option<u16>,
        /// Close reason
        reason: String,
    },
    /// Connection failed to open or broke mid-session
    Failed(String),
}

/// Instruction for the connection task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send one binary frame
    Binary(Vec<u8>),
    /// Close the connection, cancelling it if still opening
    Close,
}

/// Handle to one open or opening connection
pub struct Connection {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Wrap an outbound channel and the task servicing it
    #[must_use]
    pub const fn new(outbound: mpsc::UnboundedSender<Outbound>, task: Option<JoinHandle<()>>) -> Self {
        Self { outbound, task }
    }

    /// Queue a binary frame; returns false if the connection is gone
    pub fn send_binary(&self, bytes: Vec<u8>) -> bool {
        self.outbound.send(Outbound::Binary(bytes)).is_ok()
    }

    /// Close the connection
    ///
    /// The task is left to finish the close handshake on its own.
    pub fn close(mut self) {
        if self.outbound.send(Outbound::Close).is_err() {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
    }
}

/// Duplex byte-stream capability
pub trait Dialer {
    /// Start opening a connection to `url`
    ///
    /// Returns immediately; the outcome arrives as [`TransportEvent::Opened`]
    /// or [`TransportEvent::Failed`] through `sink`.
    fn dial(&self, url: &Url, sink: EventSink) -> Connection;
}
