//! Voice processing module
//!
//! Handles microphone capture, PCM conversion, barge-in detection, and
//! gapless playback of streamed synthesized speech.

mod capture;
mod interrupt;
pub mod pcm;
mod playback;
pub mod resample;

pub use capture::{AudioFrame, CapturePipeline, CpalMicrophone, FrameAssembler, Microphone};
pub use interrupt::InterruptDetector;
pub use playback::{CpalSpeaker, PlaybackBuffer, PlaybackEngine, Speaker, VoiceId};
