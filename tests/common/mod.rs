//! Shared test utilities
//!
//! In-memory stand-ins for the microphone, speaker, and network so sessions
//! can be driven without audio hardware or a server.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::mpsc;
use url::Url;

use dattivox_voice::session::{EventSink, SessionEvent};
use dattivox_voice::transport::{Connection, Outbound, TransportEvent, WireMessage};
use dattivox_voice::voice::{PlaybackBuffer, VoiceId};
use dattivox_voice::{Config, Dialer, Error, EventBus, Microphone, Result, Speaker, VoiceSession};

/// Samples per wire frame used throughout the tests
pub const FRAME: usize = 4096;

/// How the fake microphone should fail on acquire
#[derive(Debug, Clone, Copy)]
pub enum MicFailure {
    PermissionDenied,
    NoDevice,
    StreamError,
}

#[derive(Default)]
pub struct MicState {
    pub acquires: usize,
    pub releases: usize,
    pub sink: Option<EventSink>,
    pub fail: Option<MicFailure>,
}

/// Microphone that captures whatever the test hands it
#[derive(Clone)]
pub struct FakeMicrophone {
    pub state: Rc<RefCell<MicState>>,
    rate: u32,
}

impl FakeMicrophone {
    pub fn new(rate: u32) -> Self {
        Self {
            state: Rc::default(),
            rate,
        }
    }

    pub fn fail_with(&self, failure: MicFailure) {
        self.state.borrow_mut().fail = Some(failure);
    }

    /// Deliver one raw block; returns false if the microphone is not held
    pub fn capture(&self, samples: Vec<f32>) -> bool {
        self.state
            .borrow()
            .sink
            .as_ref()
            .is_some_and(|sink| sink.emit(SessionEvent::Captured(samples)))
    }

    pub fn acquires(&self) -> usize {
        self.state.borrow().acquires
    }

    pub fn releases(&self) -> usize {
        self.state.borrow().releases
    }
}

#[async_trait::async_trait(?Send)]
impl Microphone for FakeMicrophone {
    async fn acquire(&mut self, sink: EventSink) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        match state.fail {
            Some(MicFailure::PermissionDenied) => return Err(Error::PermissionDenied),
            Some(MicFailure::NoDevice) => {
                return Err(Error::DeviceUnavailable("no input device".to_string()));
            }
            Some(MicFailure::StreamError) => {
                return Err(Error::Audio("input stream failed to play".to_string()));
            }
            None => {}
        }

        state.acquires += 1;
        state.sink = Some(sink);
        Ok(self.rate)
    }

    fn release(&mut self) {
        let mut state = self.state.borrow_mut();
        if state.sink.take().is_some() {
            state.releases += 1;
        }
    }

    fn is_acquired(&self) -> bool {
        self.state.borrow().sink.is_some()
    }
}

/// A buffer as the speaker saw it
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled {
    pub id: VoiceId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Default)]
pub struct SpeakerState {
    pub now: f64,
    pub scheduled: Vec<Scheduled>,
    pub cancelled: Vec<VoiceId>,
}

/// Speaker with a hand-driven clock that records every call
#[derive(Clone, Default)]
pub struct FakeSpeaker {
    pub state: Rc<RefCell<SpeakerState>>,
}

impl FakeSpeaker {
    pub fn set_now(&self, now: f64) {
        self.state.borrow_mut().now = now;
    }

    pub fn scheduled(&self) -> Vec<Scheduled> {
        self.state.borrow().scheduled.clone()
    }

    pub fn cancelled(&self) -> Vec<VoiceId> {
        self.state.borrow().cancelled.clone()
    }
}

impl Speaker for FakeSpeaker {
    fn now(&self) -> f64 {
        self.state.borrow().now
    }

    fn schedule(&mut self, id: VoiceId, buffer: &PlaybackBuffer, start_at: f64) -> Result<()> {
        self.state.borrow_mut().scheduled.push(Scheduled {
            id,
            start: start_at,
            duration: buffer.duration(),
        });
        Ok(())
    }

    fn cancel(&mut self, id: VoiceId) {
        self.state.borrow_mut().cancelled.push(id);
    }
}

struct DialedConnection {
    url: Url,
    sink: EventSink,
    rx: mpsc::UnboundedReceiver<Outbound>,
    received: Vec<Outbound>,
}

/// Dialer whose connections are driven by the test
#[derive(Clone, Default)]
pub struct FakeDialer {
    connections: Rc<RefCell<Vec<DialedConnection>>>,
}

impl FakeDialer {
    pub fn dials(&self) -> usize {
        self.connections.borrow().len()
    }

    pub fn url(&self, index: usize) -> Url {
        self.connections.borrow()[index].url.clone()
    }

    /// Report a transport event on connection `index`
    pub fn emit(&self, index: usize, event: TransportEvent) {
        self.connections.borrow()[index]
            .sink
            .emit(SessionEvent::Transport(event));
    }

    pub fn open(&self, index: usize) {
        self.emit(index, TransportEvent::Opened);
    }

    pub fn send_binary(&self, index: usize, bytes: Vec<u8>) {
        self.emit(index, TransportEvent::Message(WireMessage::Binary(bytes)));
    }

    pub fn send_text(&self, index: usize, text: &str) {
        self.emit(index, TransportEvent::Message(WireMessage::Text(text.to_string())));
    }

    /// Everything the session has written to connection `index`
    pub fn outbound(&self, index: usize) -> Vec<Outbound> {
        let mut connections = self.connections.borrow_mut();
        let connection = &mut connections[index];
        while let Ok(message) = connection.rx.try_recv() {
            connection.received.push(message);
        }
        connection.received.clone()
    }

    pub fn closes(&self, index: usize) -> usize {
        self.outbound(index)
            .iter()
            .filter(|m| matches!(m, Outbound::Close))
            .count()
    }

    pub fn frames_sent(&self, index: usize) -> usize {
        self.outbound(index)
            .iter()
            .filter(|m| matches!(m, Outbound::Binary(_)))
            .count()
    }
}

impl Dialer for FakeDialer {
    fn dial(&self, url: &Url, sink: EventSink) -> Connection {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.borrow_mut().push(DialedConnection {
            url: url.clone(),
            sink,
            rx,
            received: Vec::new(),
        });
        Connection::new(tx, None)
    }
}

pub type TestSession = VoiceSession<FakeMicrophone, FakeSpeaker, FakeDialer>;

/// A session wired to fakes, plus handles to inspect them
pub struct Harness {
    pub session: TestSession,
    pub mic: FakeMicrophone,
    pub speaker: FakeSpeaker,
    pub dialer: FakeDialer,
    pub notices: mpsc::UnboundedReceiver<dattivox_voice::Notice>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mic = FakeMicrophone::new(config.audio.sample_rate);
        let speaker = FakeSpeaker::default();
        let dialer = FakeDialer::default();
        let (tx, notices) = mpsc::unbounded_channel();

        let session = VoiceSession::new(
            config,
            mic.clone(),
            speaker.clone(),
            dialer.clone(),
            EventBus::new(),
        )
        .with_notices(tx);

        Self {
            session,
            mic,
            speaker,
            dialer,
            notices,
        }
    }

    /// Start and open the first connection
    pub async fn active(config: Config) -> Self {
        let mut harness = Self::with_config(config);
        harness
            .session
            .start_default()
            .await
            .expect("start should succeed");
        let index = harness.dialer.dials() - 1;
        harness.dialer.open(index);
        harness.session.process_pending();
        harness
    }

    /// Drain and return every notice sent so far
    pub fn take_notices(&mut self) -> Vec<dattivox_voice::Notice> {
        let mut notices = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            notices.push(notice);
        }
        notices
    }
}

/// One frame of all-zero PCM as wire bytes
pub fn silence_bytes(samples: usize) -> Vec<u8> {
    vec![0u8; samples * 2]
}
