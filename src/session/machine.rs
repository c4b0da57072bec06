//! Voice session state machine

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use super::event::{Envelope, EventBus, SessionEvent};
use super::stats::{Notice, SessionStats};
use super::SessionState;
use crate::config::{self, Config};
use crate::transport::{Connection, Dialer, Inbound, TransportEvent, WireMessage, NORMAL_CLOSE};
use crate::voice::{
    AudioFrame, CapturePipeline, InterruptDetector, Microphone, PlaybackEngine, Speaker,
};
use crate::{Error, Result};

/// One explicit voice session: capture handle, connection, playback queue, state
///
/// All mutation happens through [`start`](Self::start), [`stop`](Self::stop),
/// and [`handle`](Self::handle), which the caller drives from a single task.
pub struct VoiceSession<M, S, D> {
    config: Config,
    mic: M,
    playback: PlaybackEngine<S>,
    dialer: D,
    bus: EventBus,
    state: SessionState,
    epoch: u64,
    connection: Option<Connection>,
    pipeline: Option<CapturePipeline>,
    detector: InterruptDetector,
    handshake: Option<JoinHandle<()>>,
    stats: SessionStats,
    notices: Option<mpsc::UnboundedSender<Notice>>,
}

impl<M, S, D> VoiceSession<M, S, D>
where
    M: Microphone,
    S: Speaker,
    D: Dialer,
{
    /// Create an idle session
    ///
    /// `bus` must be the bus the speaker reports completions into.
    pub fn new(config: Config, mic: M, speaker: S, dialer: D, bus: EventBus) -> Self {
        let playback = PlaybackEngine::new(speaker, config.audio.sample_rate);
        let detector = InterruptDetector::new(config.audio.interrupt_threshold);

        Self {
            config,
            mic,
            playback,
            dialer,
            bus,
            state: SessionState::Idle,
            epoch: 0,
            connection: None,
            pipeline: None,
            detector,
            handshake: None,
            stats: SessionStats::default(),
            notices: None,
        }
    }

    /// Report user-visible outcomes on `tx`
    #[must_use]
    pub fn with_notices(mut self, tx: mpsc::UnboundedSender<Notice>) -> Self {
        self.notices = Some(tx);
        self
    }

    /// Start a session against the configured endpoint and language
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start)
    pub async fn start_default(&mut self) -> Result<()> {
        let endpoint = self.config.session.endpoint.clone();
        let language = self.config.session.language.clone();
        self.start(&endpoint, &language).await
    }

    /// Start a session, tearing down and settling first if one is running
    ///
    /// Returns once the microphone is held and the connection is opening.
    /// The session becomes active when the connection opens or the remote
    /// side sends its first message.
    ///
    /// # Errors
    ///
    /// Returns `Config` for a malformed language tag, leaving any running
    /// session untouched. Returns `PermissionDenied` or `DeviceUnavailable`
    /// if the microphone cannot be acquired; the session is back in Idle and
    /// a notice has been sent by the time the error is returned.
    pub async fn start(&mut self, endpoint: &Url, language: &str) -> Result<()> {
        if !config::is_valid_language_tag(language) {
            return Err(Error::Config(format!("invalid language tag {language:?}")));
        }

        if self.state != SessionState::Idle {
            tracing::info!(epoch = self.epoch, state = %self.state, "restarting voice session");
            self.stop();
            tokio::time::sleep(self.config.session.settle_delay).await;
        }

        self.epoch += 1;
        let epoch = self.epoch;
        self.state = SessionState::Connecting;
        tracing::info!(epoch, endpoint = %endpoint, language, "starting voice session");

        let device_rate = match self.mic.acquire(self.bus.sink(epoch)).await {
            Ok(rate) => rate,
            Err(e) => return Err(self.abort(e)),
        };

        let audio = &self.config.audio;
        match CapturePipeline::new(device_rate, audio.sample_rate, audio.frame_samples) {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(e) => return Err(self.abort(e)),
        }

        let url = config::with_language(endpoint, language);
        self.connection = Some(self.dialer.dial(&url, self.bus.sink(epoch)));

        let sink = self.bus.sink(epoch);
        let timeout = self.config.session.handshake_timeout;
        self.handshake = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            sink.emit(SessionEvent::HandshakeExpired);
        }));

        Ok(())
    }

    /// Tear the session down and return to Idle
    ///
    /// Safe to call any number of times; later calls find nothing to release.
    pub fn stop(&mut self) {
        let was_idle = self.state == SessionState::Idle;
        if !was_idle {
            self.state = SessionState::Closing;
            tracing::info!(epoch = self.epoch, "stopping voice session");
        }

        if let Some(timer) = self.handshake.take() {
            timer.abort();
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.mic.release();
        self.pipeline = None;
        self.playback.interrupt();

        // Anything still in flight from this epoch is now stale
        if !was_idle {
            self.epoch += 1;
        }
        self.state = SessionState::Idle;
    }

    /// Apply one event to the session
    pub fn handle(&mut self, envelope: Envelope) {
        let Envelope { epoch, event } = envelope;

        // Completions come from the long-lived speaker, not from a session epoch
        if let SessionEvent::PlaybackFinished(id) = event {
            self.playback.on_finished(id);
            return;
        }

        if epoch != self.epoch || self.state == SessionState::Idle {
            tracing::trace!(epoch, current = self.epoch, "discarding stale session event");
            return;
        }

        match event {
            SessionEvent::Captured(raw) => self.on_captured(&raw),
            SessionEvent::Transport(event) => self.on_transport(event),
            SessionEvent::HandshakeExpired => self.on_handshake_expired(),
            SessionEvent::PlaybackFinished(_) => {}
        }
    }

    /// Handle every event already queued; returns how many were handled
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(envelope) = self.bus.try_next() {
            self.handle(envelope);
            handled += 1;
        }
        handled
    }

    /// Wait for the next event
    pub async fn next_event(&mut self) -> Option<Envelope> {
        self.bus.next().await
    }

    fn on_captured(&mut self, raw: &[f32]) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };

        let blocks = match pipeline.push(raw) {
            Ok(blocks) => blocks,
            Err(e) => {
                tracing::warn!(error = %e, "dropping captured audio");
                return;
            }
        };

        for block in blocks {
            self.stats.frames_captured += 1;
            if self.detector.check(&block, &mut self.playback) {
                self.stats.interruptions += 1;
            }
            self.send_frame(AudioFrame::from_floats(&block));
        }
    }

    fn send_frame(&mut self, frame: AudioFrame) {
        let connection = match (self.state, self.connection.as_ref()) {
            (SessionState::Active, Some(connection)) => connection,
            _ => {
                self.stats.frames_dropped += 1;
                tracing::trace!(state = %self.state, "dropping frame outside active session");
                return;
            }
        };

        let bytes = frame.into_bytes();
        let len = bytes.len() as u64;
        if connection.send_binary(bytes) {
            self.stats.frames_sent += 1;
            self.stats.bytes_sent += len;
            tracing::trace!(bytes = len, "frame sent");
        } else {
            self.stats.frames_dropped += 1;
            tracing::debug!("connection gone, frame dropped");
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if self.state == SessionState::Connecting {
                    self.activate();
                } else {
                    tracing::debug!(epoch = self.epoch, "connection opened after handshake");
                }
            }
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::Closed { code, reason } => {
                if code == Some(NORMAL_CLOSE) {
                    tracing::info!(epoch = self.epoch, reason = %reason, "remote side ended session");
                    self.notify(Notice::Ended);
                } else {
                    tracing::warn!(epoch = self.epoch, ?code, reason = %reason, "connection closed");
                    let detail = if reason.is_empty() {
                        code.map_or_else(
                            || "connection closed".to_string(),
                            |c| format!("closed with code {c}"),
                        )
                    } else {
                        reason
                    };
                    self.notify(Notice::from_error(&Error::Transport(detail)));
                }
                self.stop();
            }
            TransportEvent::Failed(detail) => {
                tracing::error!(epoch = self.epoch, error = %detail, "transport error");
                self.notify(Notice::from_error(&Error::Transport(detail)));
                self.stop();
            }
        }
    }

    fn on_message(&mut self, message: WireMessage) {
        // The remote side only speaks once it is ready, so any message completes the handshake
        if self.state == SessionState::Connecting {
            tracing::debug!(epoch = self.epoch, "message before open, treating as handshake");
            self.activate();
        }

        match message.classify() {
            Inbound::Control(text) => {
                self.stats.control_messages += 1;
                if text.trim() == self.config.session.control_sentinel {
                    tracing::debug!(epoch = self.epoch, "connection acknowledged");
                } else {
                    tracing::debug!(text = %text, "ignoring control message");
                }
            }
            Inbound::Audio(bytes) => match self.playback.enqueue(&bytes) {
                Ok(()) => {
                    self.stats.buffers_enqueued += 1;
                    self.stats.bytes_received += bytes.len() as u64;
                }
                Err(e) => {
                    self.stats.malformed_payloads += 1;
                    tracing::warn!(error = %e, bytes = bytes.len(), "discarding inbound payload");
                }
            },
        }
    }

    fn on_handshake_expired(&mut self) {
        self.handshake = None;
        if self.state != SessionState::Connecting {
            return;
        }

        let timeout = self.config.session.handshake_timeout;
        tracing::error!(epoch = self.epoch, ?timeout, "handshake timed out");
        self.notify(Notice::from_error(&Error::HandshakeTimeout(timeout)));
        self.stop();
    }

    fn activate(&mut self) {
        self.state = SessionState::Active;
        if let Some(timer) = self.handshake.take() {
            timer.abort();
        }
        tracing::info!(epoch = self.epoch, "voice session active");
        self.notify(Notice::Connected);
    }

    /// Report a failed start and return to Idle
    fn abort(&mut self, err: Error) -> Error {
        tracing::error!(epoch = self.epoch, error = %err, "voice session failed to start");
        self.notify(Notice::from_error(&err));
        self.stop();
        err
    }

    fn notify(&self, notice: Notice) {
        if let Some(tx) = &self.notices {
            if tx.send(notice).is_err() {
                tracing::debug!("notice receiver dropped");
            }
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Counters accumulated since creation
    #[must_use]
    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Epoch events must carry to be applied
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the microphone is held
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.mic.is_acquired()
    }

    /// Playback queue
    #[must_use]
    pub const fn playback(&self) -> &PlaybackEngine<S> {
        &self.playback
    }

    /// Effective configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }
}
