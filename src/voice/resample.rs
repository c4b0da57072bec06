//! Sample-rate conversion for devices that cannot run at the wire rate

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Incremental mono resampler fed with arbitrarily sized device blocks
pub struct StreamResampler {
    inner: FftFixedIn<f64>,
    pending: Vec<f64>,
}

impl StreamResampler {
    /// Create a resampler converting `from_rate` to `to_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the rates are unsupported
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let inner = FftFixedIn::<f64>::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_SIZE,
            SUB_CHUNKS,
            1,
        )
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        Ok(Self {
            inner,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
        })
    }

    /// Feed samples and return whatever output is ready
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend(samples.iter().map(|&s| f64::from(s)));

        let mut output = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let chunk: Vec<f64> = self.pending.drain(..needed).collect();
            let result = self
                .inner
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            output.extend(result[0].iter().map(|&s| s as f32));
        }

        Ok(output)
    }
}

/// Resample a complete buffer in one shot, preserving its duration
///
/// # Errors
///
/// Returns error if resampling fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::new();

    for chunk in input.chunks(CHUNK_SIZE) {
        let wave = [chunk];
        let result = if chunk.len() == CHUNK_SIZE {
            resampler.process(&wave[..], None)
        } else {
            resampler.process_partial(Some(&wave[..]), None)
        }
        .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    // Flush the filter tail
    let tail = resampler
        .process_partial::<&[f64]>(None, None)
        .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
    output.extend_from_slice(&tail[0]);

    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;
    let delay = resampler.output_delay().min(output.len());

    let mut trimmed: Vec<f32> = output[delay..].iter().map(|&s| s as f32).collect();
    trimmed.resize(expected, 0.0);
    Ok(trimmed)
}
