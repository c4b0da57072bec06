//! Audio playback to speakers
//!
//! [`PlaybackEngine`] owns the FIFO of decoded buffers and schedules them
//! back-to-back on a [`Speaker`]. Only one buffer plays at a time; the next
//! is scheduled when the speaker reports completion.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};

use super::capture::unsupported_format;
use super::{pcm, resample};
use crate::session::{EventSink, SessionEvent};
use crate::{Error, Result};

/// Identifier of one scheduled buffer
pub type VoiceId = u64;

/// A decoded block of float samples awaiting playback
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Sample rate of `samples`
    pub sample_rate: u32,

    /// Output clock time the buffer was scheduled at, once scheduled
    pub start_time: Option<f64>,
}

impl PlaybackBuffer {
    /// Decode 16-bit PCM into a playable buffer
    #[must_use]
    pub fn from_pcm(samples: &[i16], sample_rate: u32) -> Self {
        Self {
            samples: pcm::pcm16_to_floats(samples),
            sample_rate,
            start_time: None,
        }
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Speaker output capability
///
/// Completion of a scheduled buffer is reported asynchronously as
/// [`SessionEvent::PlaybackFinished`]; the engine then calls
/// [`PlaybackEngine::on_finished`].
pub trait Speaker {
    /// Current output clock in seconds
    fn now(&self) -> f64;

    /// Play `buffer` starting at `start_at` on the output clock
    ///
    /// # Errors
    ///
    /// Returns error if the buffer cannot be handed to the device
    fn schedule(&mut self, id: VoiceId, buffer: &PlaybackBuffer, start_at: f64) -> Result<()>;

    /// Stop a scheduled or playing buffer; unknown or finished ids are ignored
    fn cancel(&mut self, id: VoiceId);
}

/// Sequences inbound audio gaplessly and supports abrupt interruption
pub struct PlaybackEngine<S> {
    speaker: S,
    sample_rate: u32,
    queue: VecDeque<PlaybackBuffer>,
    current: Option<VoiceId>,
    next_start: f64,
    next_id: VoiceId,
}

impl<S: Speaker> PlaybackEngine<S> {
    /// Create an engine decoding inbound PCM at `sample_rate`
    pub const fn new(speaker: S, sample_rate: u32) -> Self {
        Self {
            speaker,
            sample_rate,
            queue: VecDeque::new(),
            current: None,
            next_start: 0.0,
            next_id: 1,
        }
    }

    /// Decode a binary payload, append it, and start playback if idle
    ///
    /// # Errors
    ///
    /// Returns `MalformedPayload` if the payload is not 16-bit PCM
    pub fn enqueue(&mut self, payload: &[u8]) -> Result<()> {
        let samples = pcm::decode_le(payload)?;
        self.queue
            .push_back(PlaybackBuffer::from_pcm(&samples, self.sample_rate));

        tracing::trace!(
            samples = samples.len(),
            queued = self.queue.len(),
            "playback buffer enqueued"
        );

        self.drain();
        Ok(())
    }

    /// Schedule the head of the queue unless something is already playing
    pub fn drain(&mut self) {
        if self.current.is_some() {
            return;
        }

        while let Some(mut buffer) = self.queue.pop_front() {
            let start = self.speaker.now().max(self.next_start);
            let id = self.next_id;
            self.next_id += 1;
            buffer.start_time = Some(start);

            match self.speaker.schedule(id, &buffer, start) {
                Ok(()) => {
                    self.next_start = start + buffer.duration();
                    self.current = Some(id);
                    tracing::trace!(id, start, duration = buffer.duration(), "playback scheduled");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, id, "failed to schedule playback buffer, skipping");
                }
            }
        }
    }

    /// Handle a completion report from the speaker
    ///
    /// Reports for buffers that are no longer current are ignored.
    pub fn on_finished(&mut self, id: VoiceId) {
        if self.current != Some(id) {
            tracing::trace!(id, "ignoring stale playback completion");
            return;
        }

        self.current = None;
        if !self.queue.is_empty() {
            self.drain();
        }
    }

    /// Stop playback immediately and discard everything queued
    ///
    /// Returns the number of buffers dropped, including the one playing.
    pub fn interrupt(&mut self) -> usize {
        let mut dropped = self.queue.len();
        self.queue.clear();

        if let Some(id) = self.current.take() {
            self.speaker.cancel(id);
            dropped += 1;
        }

        self.next_start = 0.0;

        if dropped > 0 {
            tracing::debug!(dropped, "playback interrupted");
        }
        dropped
    }

    /// Whether a buffer is currently playing
    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    /// Buffers waiting behind the current one
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Earliest start time for the next buffer
    #[must_use]
    pub const fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Access the underlying speaker
    #[must_use]
    pub const fn speaker(&self) -> &S {
        &self.speaker
    }
}

/// A buffer placed on the device timeline
struct ScheduledVoice {
    id: VoiceId,
    start_frame: u64,
    samples: Vec<f32>,
    position: usize,
}

/// State shared with the output callback
#[derive(Default)]
struct Timeline {
    clock: u64,
    voices: Vec<ScheduledVoice>,
}

/// Plays scheduled buffers on the default output device via cpal
///
/// Completions are reported once per output block, after the block that
/// played a buffer's last sample has been rendered. The next buffer is then
/// scheduled at the device clock, which is already past the previous end, so
/// consecutive buffers are separated by up to one output block of silence.
pub struct CpalSpeaker {
    timeline: Arc<Mutex<Timeline>>,
    device_rate: u32,
    _stream: Stream,
}

impl CpalSpeaker {
    /// Open the default output device, preferring `preferred_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no output device or usable config exists
    pub fn open(preferred_rate: u32, completions: EventSink) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

        let (config, format) = select_output_config(&device, preferred_rate)?;
        let channels = usize::from(config.channels);
        let device_rate = config.sample_rate.0;

        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let shared = Arc::clone(&timeline);

        let stream = match format {
            SampleFormat::F32 => build_render_stream::<f32>(&device, &config, shared, completions),
            SampleFormat::I16 => build_render_stream::<i16>(&device, &config, shared, completions),
            SampleFormat::U16 => build_render_stream::<u16>(&device, &config, shared, completions),
            other => Err(unsupported_format("output", other)),
        }?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = device_rate,
            channels,
            ?format,
            "audio playback initialized"
        );

        Ok(Self {
            timeline,
            device_rate,
            _stream: stream,
        })
    }
}

impl Speaker for CpalSpeaker {
    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> f64 {
        let clock = self.timeline.lock().map(|t| t.clock).unwrap_or_default();
        clock as f64 / f64::from(self.device_rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn schedule(&mut self, id: VoiceId, buffer: &PlaybackBuffer, start_at: f64) -> Result<()> {
        let samples = resample::resample(&buffer.samples, buffer.sample_rate, self.device_rate)?;
        let start_frame = (start_at * f64::from(self.device_rate)).round().max(0.0) as u64;

        let mut timeline = self
            .timeline
            .lock()
            .map_err(|_| Error::Audio("playback timeline poisoned".to_string()))?;
        timeline.voices.push(ScheduledVoice {
            id,
            start_frame,
            samples,
            position: 0,
        });
        Ok(())
    }

    fn cancel(&mut self, id: VoiceId) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.voices.retain(|v| v.id != id);
        }
    }
}

/// Mix every voice due at the current clock into the output block
fn render(timeline: &mut Timeline, data: &mut [f32], channels: usize, completions: &EventSink) {
    for frame in data.chunks_mut(channels) {
        let clock = timeline.clock;
        let mut sample = 0.0;

        for voice in &mut timeline.voices {
            if clock >= voice.start_frame && voice.position < voice.samples.len() {
                sample += voice.samples[voice.position];
                voice.position += 1;
            }
        }

        frame.fill(sample.clamp(-1.0, 1.0));
        timeline.clock += 1;
    }

    timeline.voices.retain(|voice| {
        let done = voice.position >= voice.samples.len();
        if done {
            completions.emit(SessionEvent::PlaybackFinished(voice.id));
        }
        !done
    });
}

/// Output stream rendering the timeline in the device's sample type
fn build_render_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    timeline: Arc<Mutex<Timeline>>,
    completions: EventSink,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels);
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.clear();
                scratch.resize(data.len(), 0.0);
                if let Ok(mut timeline) = timeline.lock() {
                    render(&mut timeline, &mut scratch, channels, &completions);
                }
                floats_to_samples(&scratch, data);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Write floats in [-1, 1] as device samples
fn floats_to_samples<T>(floats: &[f32], out: &mut [T])
where
    T: Sample + FromSample<f32>,
{
    for (out, &sample) in out.iter_mut().zip(floats) {
        *out = T::from_sample(sample);
    }
}

/// Pick an f32 config at the preferred rate (mono, then stereo), else the device default
fn select_output_config(
    device: &cpal::Device,
    preferred_rate: u32,
) -> Result<(StreamConfig, SampleFormat)> {
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels
                && c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(preferred_rate)
                && c.max_sample_rate() >= SampleRate(preferred_rate)
        })
    };

    if let Some(config) = supports(1).or_else(|| supports(2)) {
        let config = config.with_sample_rate(SampleRate(preferred_rate));
        return Ok((config.config(), config.sample_format()));
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
    Ok((fallback.config(), fallback.sample_format()))
}
