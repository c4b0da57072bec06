//! Barge-in detection
//!
//! While the assistant is speaking, each captured frame is checked for
//! user speech by RMS energy. A frame above threshold stops playback.

use super::pcm;
use super::playback::{PlaybackEngine, Speaker};

/// Decides per captured frame whether the user is talking over playback
#[derive(Debug, Clone)]
pub struct InterruptDetector {
    threshold: f32,
    triggered: u64,
}

impl InterruptDetector {
    /// Create a detector firing above `threshold` RMS on the [-1, 1] scale
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self {
            threshold,
            triggered: 0,
        }
    }

    /// Inspect one captured frame and interrupt playback on speech onset
    ///
    /// Only evaluated while a buffer is playing, so once playback has been
    /// stopped further loud frames are no-ops until new audio arrives.
    /// Returns true if this frame triggered an interruption.
    pub fn check<S: Speaker>(&mut self, samples: &[f32], playback: &mut PlaybackEngine<S>) -> bool {
        if !playback.is_playing() {
            return false;
        }

        let level = pcm::rms(samples);
        if level <= self.threshold {
            return false;
        }

        let dropped = playback.interrupt();
        self.triggered += 1;

        tracing::info!(rms = level, dropped, "user speech detected, interrupting playback");
        true
    }

    /// RMS threshold in use
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Interruptions triggered so far
    #[must_use]
    pub const fn triggered(&self) -> u64 {
        self.triggered
    }
}
