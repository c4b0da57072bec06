//! Session event plumbing
//!
//! Capture callbacks, connection tasks, timers, and the output device all
//! report into one unbounded channel, which the session drains in order on a
//! single task. Each event is stamped with the epoch of the session that
//! produced it so a torn-down session's late events can be told apart.

use tokio::sync::mpsc;

use crate::transport::TransportEvent;
use crate::voice::VoiceId;

/// Something that happened to the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Raw mono float block from the microphone at the device rate
    Captured(Vec<f32>),
    /// Connection lifecycle or inbound message
    Transport(TransportEvent),
    /// Speaker finished a scheduled buffer
    PlaybackFinished(VoiceId),
    /// Handshake bound elapsed
    HandshakeExpired,
}

/// An event tagged with the epoch that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Session epoch at emission time
    pub epoch: u64,
    /// The event itself
    pub event: SessionEvent,
}

/// Cloneable, thread-safe handle for emitting events into a session
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSink {
    /// Emit an event; returns false if the session is gone
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx
            .send(Envelope {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }

    /// Epoch stamped on emitted events
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Single ordered queue of session events
#[derive(Debug)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Sink stamping events with `epoch`
    #[must_use]
    pub fn sink(&self, epoch: u64) -> EventSink {
        EventSink {
            epoch,
            tx: self.tx.clone(),
        }
    }

    /// Sink for long-lived collaborators not bound to one session
    #[must_use]
    pub fn detached_sink(&self) -> EventSink {
        self.sink(0)
    }

    /// Wait for the next event
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued
    pub fn try_next(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sinks_stamp_their_epoch() {
        let mut bus = EventBus::new();
        let first = bus.sink(1);
        let second = bus.sink(2);

        assert!(second.emit(SessionEvent::HandshakeExpired));
        assert!(first.emit(SessionEvent::PlaybackFinished(3)));

        assert_eq!(bus.try_next().unwrap().epoch, 2);
        let envelope = bus.try_next().unwrap();
        assert_eq!(envelope.epoch, 1);
        assert_eq!(envelope.event, SessionEvent::PlaybackFinished(3));
        assert!(bus.try_next().is_none());
    }

    #[test]
    fn detached_sink_uses_epoch_zero() {
        let bus = EventBus::new();
        assert_eq!(bus.detached_sink().epoch(), 0);
    }
}
