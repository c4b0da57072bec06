//! PCM sample conversion and wire encoding
//!
//! Outbound audio is float [-1.0, 1.0] scaled to signed 16-bit with the
//! asymmetric 32768/32767 split; inbound audio divides by 32767 and clamps.

use crate::{Error, Result};

/// Bytes per encoded sample (i16 little-endian)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Convert one float sample to signed 16-bit PCM
///
/// Negative values scale by 32768 and positive by 32767 so both ends of the
/// i16 range are reachable; the fractional part is truncated toward zero.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn float_to_pcm16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Convert one signed 16-bit sample to float, clamped to [-1.0, 1.0]
#[must_use]
pub fn pcm16_to_float(sample: i16) -> f32 {
    (f32::from(sample) / 32767.0).clamp(-1.0, 1.0)
}

/// Convert a block of float samples to 16-bit PCM
#[must_use]
pub fn floats_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(float_to_pcm16).collect()
}

/// Convert a block of 16-bit PCM samples to float
#[must_use]
pub fn pcm16_to_floats(samples: &[i16]) -> Vec<f32> {
    samples.iter().copied().map(pcm16_to_float).collect()
}

/// Serialize samples as contiguous little-endian bytes
#[must_use]
pub fn encode_le(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse contiguous little-endian bytes into samples
///
/// # Errors
///
/// Returns `MalformedPayload` if the payload is empty or has an odd byte count
pub fn decode_le(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.is_empty() {
        return Err(Error::MalformedPayload("empty PCM payload".to_string()));
    }
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(Error::MalformedPayload(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Root-mean-square energy of float samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Average interleaved multi-channel samples down to mono
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asymmetric_scaling_reaches_both_ends() {
        assert_eq!(float_to_pcm16(1.0), i16::MAX);
        assert_eq!(float_to_pcm16(-1.0), i16::MIN);
        assert_eq!(float_to_pcm16(0.0), 0);
        assert_eq!(float_to_pcm16(2.5), i16::MAX);
        assert_eq!(float_to_pcm16(-7.0), i16::MIN);
    }

    #[test]
    fn conversion_truncates_toward_zero() {
        // 0.5 * 32767 = 16383.5 and -0.5 * 32768 = -16384
        assert_eq!(float_to_pcm16(0.5), 16383);
        assert_eq!(float_to_pcm16(-0.5), -16384);
        assert_eq!(float_to_pcm16(-0.000_01), 0);
    }

    #[test]
    fn nan_encodes_as_silence() {
        assert_eq!(float_to_pcm16(f32::NAN), 0);
    }

    #[test]
    fn decode_clamps_most_negative() {
        assert!((pcm16_to_float(i16::MIN) + 1.0).abs() < f32::EPSILON);
        assert!((pcm16_to_float(i16::MAX) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn round_trip_within_one_step() {
        let step = 1.0 / 32767.0;
        for i in -1000..=1000 {
            #[allow(clippy::cast_precision_loss)]
            let s = i as f32 / 1000.0;
            let back = pcm16_to_float(float_to_pcm16(s));
            assert!((back - s).abs() <= step + f32::EPSILON, "sample {s} came back as {back}");
        }
    }

    #[test]
    fn le_byte_layout() {
        let bytes = encode_le(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
        assert_eq!(decode_le(&bytes).unwrap(), vec![1, -2, 0x1234]);
    }

    #[test]
    fn decode_rejects_odd_and_empty() {
        assert!(matches!(decode_le(&[1, 2, 3]), Err(Error::MalformedPayload(_))));
        assert!(matches!(decode_le(&[]), Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!(rms(&[]) < f32::EPSILON);
        assert!(rms(&vec![0.0; 64]) < f32::EPSILON);
        assert!((rms(&vec![0.02; 64]) - 0.02).abs() < 1e-6);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_stereo() {
        let mono = downmix(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }
}
