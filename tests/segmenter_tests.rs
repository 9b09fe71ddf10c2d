// Tests for overlapping segment sealing.
//
// Segments start every STEP and span DURATION, so adjacent segments share
// DURATION - STEP of audio at the join.

use scribeline::config::SegmentingConfig;
use scribeline::Segmenter;
use std::io::Cursor;

fn config() -> SegmentingConfig {
    SegmentingConfig {
        step_ms: 30_000,
        duration_ms: 33_000,
        sample_rate: 16_000,
    }
}

/// Deterministic, repeating sample pattern so overlap windows can be
/// compared by value after the round trip through 16-bit PCM.
fn sample_at(index: usize) -> f32 {
    ((index % 100) as f32 - 50.0) / 128.0
}

fn wav_samples(payload: &[u8]) -> Vec<i16> {
    let reader = hound::WavReader::new(Cursor::new(payload)).expect("invalid WAV payload");
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().sample_rate, 16_000);
    reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .expect("unreadable samples")
}

#[test]
fn thirty_three_seconds_seals_two_overlapping_segments() {
    // Feed 33s of 16kHz audio in 100ms frames: one full segment at t=0 and
    // the partial second segment (sealed by flush) at t=30000ms.
    let mut segmenter = Segmenter::new("session-a".to_string(), &config());

    let frame_len = 1_600; // 100ms at 16kHz
    let total = 33 * 16_000;
    let mut sealed = Vec::new();
    let mut index = 0;
    while index < total {
        let frame: Vec<f32> = (index..index + frame_len).map(sample_at).collect();
        sealed.extend(segmenter.push(&frame).expect("push failed"));
        index += frame_len;
    }
    if let Some(tail) = segmenter.flush().expect("flush failed") {
        sealed.push(tail);
    }

    assert_eq!(sealed.len(), 2);

    assert_eq!(sealed[0].sequence, 0);
    assert_eq!(sealed[0].start_ms, 0);
    assert_eq!(sealed[0].end_ms, 33_000);

    assert_eq!(sealed[1].sequence, 1);
    assert_eq!(sealed[1].start_ms, 30_000);
    assert_eq!(sealed[1].end_ms, 33_000);

    // The join region [30000, 33000) appears in both segments with
    // identical audio.
    let first = wav_samples(&sealed[0].payload);
    let second = wav_samples(&sealed[1].payload);
    assert_eq!(first.len(), 33 * 16_000);
    assert_eq!(second.len(), 3 * 16_000);
    assert_eq!(&first[30 * 16_000..], &second[..]);
}

#[test]
fn long_capture_advances_segments_by_step() {
    // 70s of audio: full segments at t=0 and t=30s, partial tail at t=60s.
    let mut segmenter = Segmenter::new("session-b".to_string(), &config());

    let mut sealed = Vec::new();
    let mut index = 0;
    let total = 70 * 16_000;
    while index < total {
        let frame: Vec<f32> = (index..index + 1_600).map(sample_at).collect();
        sealed.extend(segmenter.push(&frame).expect("push failed"));
        index += 1_600;
    }
    if let Some(tail) = segmenter.flush().expect("flush failed") {
        sealed.push(tail);
    }

    let starts: Vec<u64> = sealed.iter().map(|s| s.start_ms).collect();
    assert_eq!(starts, vec![0, 30_000, 60_000]);
    assert_eq!(sealed[2].end_ms, 70_000);

    let sequences: Vec<u64> = sealed.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
}

#[test]
fn flush_with_no_unsealed_audio_returns_none() {
    let mut segmenter = Segmenter::new("session-c".to_string(), &config());
    assert!(segmenter.flush().expect("flush failed").is_none());

    // With duration == step, exactly one window of audio leaves no
    // unsealed tail behind.
    let config = SegmentingConfig {
        step_ms: 1_000,
        duration_ms: 1_000,
        sample_rate: 1_000,
    };
    let mut exact = Segmenter::new("session-d".to_string(), &config);
    let sealed = exact.push(&vec![0.1_f32; 1_000]).expect("push failed");
    assert_eq!(sealed.len(), 1);
    assert!(exact.flush().expect("flush failed").is_none());
}
