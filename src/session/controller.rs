//! Serializes start/stop requests onto the session task

use tokio::sync::mpsc;

use super::machine::VoiceSession;
use super::stats::SessionStats;
use crate::transport::Dialer;
use crate::voice::{Microphone, Speaker};

/// Request for the session task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start (or restart) a session, optionally overriding the language
    Start {
        /// Language tag for this session
        language: Option<String>,
    },
    /// Stop the running session, if any
    Stop,
    /// Stop and exit the controller loop
    Shutdown,
}

/// Cloneable handle for sending commands to a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ControllerHandle {
    /// Request a session start; returns false if the controller has exited
    pub fn start(&self, language: Option<String>) -> bool {
        self.tx.send(Command::Start { language }).is_ok()
    }

    /// Request a session stop
    pub fn stop(&self) -> bool {
        self.tx.send(Command::Stop).is_ok()
    }

    /// Request controller shutdown
    pub fn shutdown(&self) -> bool {
        self.tx.send(Command::Shutdown).is_ok()
    }
}

/// Owns a [`VoiceSession`] and applies commands and events one at a time
///
/// Commands are handled in the order they are sent, and a start that has to
/// restart a running session completes its settle delay before the next
/// command is read, so two sessions never overlap.
pub struct SessionController<M, S, D> {
    session: VoiceSession<M, S, D>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<M, S, D> SessionController<M, S, D>
where
    M: Microphone,
    S: Speaker,
    D: Dialer,
{
    /// Wrap a session, returning the controller and its command handle
    pub fn new(session: VoiceSession<M, S, D>) -> (Self, ControllerHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        (Self { session, commands }, ControllerHandle { tx })
    }

    /// Run until shutdown or until every handle is dropped
    ///
    /// Returns the session counters after the final teardown.
    pub async fn run(mut self) -> SessionStats {
        tracing::debug!("session controller running");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Start { language }) => {
                        let endpoint = self.session.config().session.endpoint.clone();
                        let language = language
                            .unwrap_or_else(|| self.session.config().session.language.clone());
                        match self.session.start(&endpoint, &language).await {
                            Ok(()) => {}
                            // Already reported through a notice
                            Err(e) if e.is_session_fatal() => {
                                tracing::debug!(error = %e, "start request failed");
                            }
                            Err(e) => tracing::warn!(error = %e, "start request failed"),
                        }
                    }
                    Some(Command::Stop) => self.session.stop(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(envelope) = self.session.next_event() => self.session.handle(envelope),
            }
        }

        self.session.stop();
        tracing::debug!("session controller stopped");
        self.session.stats().clone()
    }

    /// The wrapped session
    #[must_use]
    pub const fn session(&self) -> &VoiceSession<M, S, D> {
        &self.session
    }
}
