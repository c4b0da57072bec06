//! Playback queue integration tests
//!
//! Exercises scheduling against a speaker with a hand-driven clock.

use dattivox_voice::voice::pcm;
use dattivox_voice::{Error, PlaybackEngine};

mod common;

use common::{silence_bytes, FakeSpeaker, FRAME};

const RATE: u32 = 16000;

fn engine() -> (PlaybackEngine<FakeSpeaker>, FakeSpeaker) {
    let speaker = FakeSpeaker::default();
    (PlaybackEngine::new(speaker.clone(), RATE), speaker)
}

/// Play every buffer to completion in order
fn finish_all(playback: &mut PlaybackEngine<FakeSpeaker>, speaker: &FakeSpeaker) {
    let mut next = 0;
    while playback.is_playing() {
        let scheduled = speaker.scheduled();
        playback.on_finished(scheduled[next].id);
        next += 1;
    }
}

#[test]
fn test_three_silent_frames_play_back_to_back() {
    let (mut playback, speaker) = engine();

    for _ in 0..3 {
        playback.enqueue(&silence_bytes(FRAME)).unwrap();
    }
    finish_all(&mut playback, &speaker);

    let scheduled = speaker.scheduled();
    assert_eq!(scheduled.len(), 3);

    let expected = 4096.0 / 16000.0;
    for buffer in &scheduled {
        assert!((buffer.duration - expected).abs() < 1e-12);
    }
    for pair in scheduled.windows(2) {
        assert!(pair[1].start > pair[0].start);
        assert!((pair[1].start - (pair[0].start + pair[0].duration)).abs() < 1e-12);
    }
}

#[test]
fn test_only_one_buffer_plays_at_a_time() {
    let (mut playback, speaker) = engine();

    playback.enqueue(&silence_bytes(FRAME)).unwrap();
    playback.enqueue(&silence_bytes(FRAME)).unwrap();

    assert!(playback.is_playing());
    assert_eq!(playback.queued(), 1);
    assert_eq!(speaker.scheduled().len(), 1);

    // Draining again while playing changes nothing
    playback.drain();
    assert_eq!(speaker.scheduled().len(), 1);
}

#[test]
fn test_playback_follows_receipt_order() {
    let (mut playback, speaker) = engine();

    let lengths: [u16; 4] = [100, 2000, 50, 4096];
    for samples in lengths {
        playback.enqueue(&silence_bytes(usize::from(samples))).unwrap();
    }
    finish_all(&mut playback, &speaker);

    let durations: Vec<f64> = speaker.scheduled().iter().map(|s| s.duration).collect();
    let expected: Vec<f64> = lengths.iter().map(|&n| f64::from(n) / f64::from(RATE)).collect();
    assert_eq!(durations, expected);

    let ids: Vec<u64> = speaker.scheduled().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[test]
fn test_late_buffer_starts_at_current_clock() {
    let (mut playback, speaker) = engine();

    playback.enqueue(&silence_bytes(FRAME)).unwrap();
    finish_all(&mut playback, &speaker);

    // Clock moved well past the end of the last buffer
    speaker.set_now(3.0);
    playback.enqueue(&silence_bytes(FRAME)).unwrap();

    let scheduled = speaker.scheduled();
    assert!((scheduled[1].start - 3.0).abs() < 1e-12);
    assert!((playback.next_start() - (3.0 + 0.256)).abs() < 1e-12);
}

#[test]
fn test_interrupt_then_enqueue_plays_only_new_buffer() {
    let (mut playback, speaker) = engine();

    for _ in 0..4 {
        playback.enqueue(&silence_bytes(FRAME)).unwrap();
    }
    speaker.set_now(0.1);

    let dropped = playback.interrupt();
    assert_eq!(dropped, 4);
    assert_eq!(speaker.cancelled(), vec![1]);
    assert_eq!(playback.next_start(), 0.0);

    playback.enqueue(&silence_bytes(512)).unwrap();

    assert!(playback.is_playing());
    assert_eq!(playback.queued(), 0);

    let scheduled = speaker.scheduled();
    let last = scheduled.last().unwrap();
    assert_eq!(scheduled.len(), 2);
    assert_eq!(last.id, 5);
    assert!(last.start >= 0.1);

    // Completion of the cancelled buffer cannot resurrect anything
    playback.on_finished(1);
    assert!(playback.is_playing());
    assert_eq!(speaker.scheduled().len(), 2);
}

#[test]
fn test_interrupt_when_idle_is_noop() {
    let (mut playback, speaker) = engine();

    assert_eq!(playback.interrupt(), 0);
    assert_eq!(playback.interrupt(), 0);
    assert!(speaker.cancelled().is_empty());
}

#[test]
fn test_malformed_payload_is_rejected() {
    let (mut playback, speaker) = engine();

    assert!(matches!(playback.enqueue(&[1, 2, 3]), Err(Error::MalformedPayload(_))));
    assert!(matches!(playback.enqueue(&[]), Err(Error::MalformedPayload(_))));
    assert!(!playback.is_playing());
    assert!(speaker.scheduled().is_empty());
}

#[test]
fn test_pcm_round_trip_within_one_step() {
    let step = 1.0 / 32767.0;

    for i in -1000..=1000 {
        let sample = i as f32 / 1000.0;
        let decoded = pcm::pcm16_to_float(pcm::float_to_pcm16(sample));
        assert!(
            (decoded - sample).abs() <= step + f32::EPSILON,
            "sample {sample} decoded to {decoded}"
        );
    }
}

#[test]
fn test_pcm_wire_round_trip_preserves_extremes() {
    let floats = [-1.0, -0.5, 0.0, 0.5, 1.0];
    let bytes = pcm::encode_le(&pcm::floats_to_pcm16(&floats));
    assert_eq!(bytes.len(), floats.len() * pcm::BYTES_PER_SAMPLE);

    let samples = pcm::decode_le(&bytes).unwrap();
    assert_eq!(samples, vec![-32768, -16384, 0, 16383, 32767]);

    let decoded = pcm::pcm16_to_floats(&samples);
    assert_eq!(decoded[0], -1.0);
    assert_eq!(decoded[4], 1.0);
}
