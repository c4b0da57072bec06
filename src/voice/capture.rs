//! Audio capture from microphone
//!
//! The device delivers arbitrarily sized float blocks at its native rate.
//! [`CapturePipeline`] turns those into fixed-size mono blocks at the wire
//! rate, and [`AudioFrame`] carries one block as 16-bit PCM.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BuildStreamError, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig,
};

use super::pcm;
use super::resample::StreamResampler;
use crate::session::{EventSink, SessionEvent};
use crate::{Error, Result};

/// A fixed-size block of signed 16-bit mono PCM, ready for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// PCM samples at the wire rate
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// Encode a block of float samples
    #[must_use]
    pub fn from_floats(samples: &[f32]) -> Self {
        Self {
            samples: pcm::floats_to_pcm16(samples),
        }
    }

    /// Number of samples in the frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consume the frame into little-endian wire bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        pcm::encode_le(&self.samples)
    }
}

/// Microphone access capability
///
/// Implementations deliver raw mono float blocks through the sink as
/// [`SessionEvent::Captured`] until released.
#[async_trait::async_trait(?Send)]
pub trait Microphone {
    /// Request exclusive access to the default input device
    ///
    /// Returns the sample rate of the delivered blocks.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if access is refused and
    /// `DeviceUnavailable` if no input device exists
    async fn acquire(&mut self, sink: EventSink) -> Result<u32>;

    /// Stop delivering blocks and release the device; no-op when not acquired
    fn release(&mut self);

    /// Whether the device is currently held
    fn is_acquired(&self) -> bool;
}

/// Accumulates samples and emits exact fixed-size blocks
#[derive(Debug)]
pub struct FrameAssembler {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    /// Create an assembler emitting blocks of `frame_samples`
    #[must_use]
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    /// Append samples and take every complete block
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_samples;
        let mut blocks = Vec::with_capacity(complete);
        for _ in 0..complete {
            let rest = self.pending.split_off(self.frame_samples);
            blocks.push(std::mem::replace(&mut self.pending, rest));
        }
        blocks
    }

    /// Samples waiting for a complete block
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Converts device blocks into wire-rate blocks of fixed size
pub struct CapturePipeline {
    resampler: Option<StreamResampler>,
    assembler: FrameAssembler,
}

impl CapturePipeline {
    /// Create a pipeline for a device running at `device_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the rate conversion cannot be set up
    pub fn new(device_rate: u32, wire_rate: u32, frame_samples: usize) -> Result<Self> {
        let resampler = if device_rate == wire_rate {
            None
        } else {
            tracing::debug!(device_rate, wire_rate, "resampling capture input");
            Some(StreamResampler::new(device_rate, wire_rate)?)
        };

        Ok(Self {
            resampler,
            assembler: FrameAssembler::new(frame_samples),
        })
    }

    /// Feed one raw device block
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn push(&mut self, raw: &[f32]) -> Result<Vec<Vec<f32>>> {
        match self.resampler.as_mut() {
            Some(resampler) => {
                let converted = resampler.push(raw)?;
                Ok(self.assembler.push(&converted))
            }
            None => Ok(self.assembler.push(raw)),
        }
    }
}

/// Captures audio from the default input device via cpal
pub struct CpalMicrophone {
    preferred_rate: u32,
    stream: Option<Stream>,
}

impl CpalMicrophone {
    /// Create a microphone that prefers running at `preferred_rate`
    #[must_use]
    pub const fn new(preferred_rate: u32) -> Self {
        Self {
            preferred_rate,
            stream: None,
        }
    }

    /// Pick a mono f32 config at the preferred rate, else the device default
    fn select_config(&self, device: &cpal::Device) -> Result<(StreamConfig, SampleFormat)> {
        let preferred = device
            .supported_input_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(self.preferred_rate)
                    && c.max_sample_rate() >= SampleRate(self.preferred_rate)
            });

        if let Some(config) = preferred {
            let config = config.with_sample_rate(SampleRate(self.preferred_rate));
            return Ok((config.config(), config.sample_format()));
        }

        let fallback = device
            .default_input_config()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
        Ok((fallback.config(), fallback.sample_format()))
    }
}

#[async_trait::async_trait(?Send)]
impl Microphone for CpalMicrophone {
    async fn acquire(&mut self, sink: EventSink) -> Result<u32> {
        // Replace any stream still held from a previous session
        self.release();

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        let (config, format) = self.select_config(&device)?;
        let rate = config.sample_rate.0;

        let stream = match format {
            SampleFormat::F32 => build_capture_stream::<f32>(&device, &config, sink),
            SampleFormat::I16 => build_capture_stream::<i16>(&device, &config, sink),
            SampleFormat::U16 => build_capture_stream::<u16>(&device, &config, sink),
            other => Err(unsupported_format("input", other)),
        }?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = rate,
            channels = config.channels,
            ?format,
            "audio capture started"
        );

        Ok(rate)
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    fn is_acquired(&self) -> bool {
        self.stream.is_some()
    }
}

/// Input stream delivering mono float blocks whatever the device sample type
fn build_capture_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    sink: EventSink,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels);
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let floats = samples_to_floats(data);
                sink.emit(SessionEvent::Captured(pcm::downmix(&floats, channels)));
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(map_build_error)
}

/// Convert device samples to floats in [-1, 1]
fn samples_to_floats<T>(data: &[T]) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    data.iter().map(|&s| f32::from_sample(s)).collect()
}

/// Error for a device whose only stream format cannot be converted
pub(crate) fn unsupported_format(direction: &str, format: SampleFormat) -> Error {
    Error::DeviceUnavailable(format!("unsupported {direction} sample format {format:?}"))
}

fn map_build_error(err: BuildStreamError) -> Error {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            Error::DeviceUnavailable("input device disappeared".to_string())
        }
        BuildStreamError::BackendSpecific { err } if looks_like_permission(&err.description) => {
            Error::PermissionDenied
        }
        other => Error::Audio(other.to_string()),
    }
}

fn looks_like_permission(description: &str) -> bool {
    let lower = description.to_lowercase();
    ["permission", "denied", "not authorized", "not permitted"]
        .iter()
        .any(|needle| lower.contains(needle))
}
