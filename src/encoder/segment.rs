use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::Cursor;
use tracing::info;

use crate::config::SegmentingConfig;

/// One sealed, immutable window of encoded audio for the batch path.
#[derive(Debug, Clone)]
pub struct Segment {
    pub session_id: String,
    /// Monotonic per session.
    pub sequence: u64,
    /// WAV blob (16-bit mono PCM).
    pub payload: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    /// Start offset in milliseconds since the session's first sample.
    pub start_ms: u64,
    /// End offset in milliseconds since the session's first sample.
    pub end_ms: u64,
}

/// Accumulates samples and seals overlapping fixed-duration segments.
///
/// A new segment starts every `step_ms` and spans `duration_ms` of audio, so
/// adjacent segments overlap by the difference. The overlap exists so a word
/// spoken across a boundary appears complete in at least one segment;
/// downstream consumers tolerate the duplicated words at joins.
///
/// Sealing is driven by the pushed-sample count: production rate equals real
/// time, so the sample clock is the wall clock.
pub struct Segmenter {
    session_id: String,
    sample_rate: u32,
    step_samples: usize,
    duration_samples: usize,
    /// Samples not yet fully consumed, starting at absolute `buffer_start`.
    buffer: Vec<i16>,
    buffer_start: usize,
    /// Absolute count of samples pushed so far.
    total: usize,
    /// Absolute start of the next segment to seal.
    next_start: usize,
    sequence: u64,
}

impl Segmenter {
    pub fn new(session_id: String, config: &SegmentingConfig) -> Self {
        let rate = config.sample_rate as u64;
        Self {
            session_id,
            sample_rate: config.sample_rate,
            step_samples: (config.step_ms * rate / 1000) as usize,
            duration_samples: (config.duration_ms * rate / 1000) as usize,
            buffer: Vec::new(),
            buffer_start: 0,
            total: 0,
            next_start: 0,
            sequence: 0,
        }
    }

    /// Append samples, returning any segments whose window is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<Segment>> {
        self.buffer.reserve(samples.len());
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            self.buffer.push((clamped * i16::MAX as f32) as i16);
        }
        self.total += samples.len();

        let mut sealed = Vec::new();
        while self.total >= self.next_start + self.duration_samples {
            let end = self.next_start + self.duration_samples;
            sealed.push(self.seal(self.next_start, end)?);
            self.advance();
        }

        Ok(sealed)
    }

    /// Seal the trailing partial segment, if any audio remains unsealed.
    ///
    /// Called on session stop so the tail of the capture is never lost.
    pub fn flush(&mut self) -> Result<Option<Segment>> {
        if self.total <= self.next_start {
            return Ok(None);
        }
        let segment = self.seal(self.next_start, self.total)?;
        self.next_start = self.total;
        self.buffer.clear();
        self.buffer_start = self.total;
        Ok(Some(segment))
    }

    fn advance(&mut self) {
        self.next_start += self.step_samples;
        // Drop samples no future segment can reach.
        if self.next_start > self.buffer_start {
            let cut = (self.next_start - self.buffer_start).min(self.buffer.len());
            self.buffer.drain(..cut);
            self.buffer_start += cut;
        }
    }

    fn seal(&mut self, start: usize, end: usize) -> Result<Segment> {
        let rel_start = start - self.buffer_start;
        let rel_end = end - self.buffer_start;
        let samples = &self.buffer[rel_start..rel_end];

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .context("Failed to create WAV writer for segment")?;
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to segment")?;
            }
            writer
                .finalize()
                .context("Failed to finalize segment WAV")?;
        }

        let rate = self.sample_rate as u64;
        let segment = Segment {
            session_id: self.session_id.clone(),
            sequence: self.sequence,
            payload: cursor.into_inner(),
            captured_at: Utc::now(),
            start_ms: start as u64 * 1000 / rate,
            end_ms: end as u64 * 1000 / rate,
        };
        self.sequence += 1;

        info!(
            "Sealed segment {} for {}: {:.1}s - {:.1}s ({} samples)",
            segment.sequence,
            segment.session_id,
            segment.start_ms as f64 / 1000.0,
            segment.end_ms as f64 / 1000.0,
            samples.len()
        );

        Ok(segment)
    }
}
