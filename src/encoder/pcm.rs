use base64::Engine;
use tokio::sync::mpsc;
use tracing::warn;

/// Raw chunk size cap, kept under the 64KB frame limit of the streaming
/// transport before base64 expansion.
pub const MAX_CHUNK_BYTES: usize = 60 * 1024;

/// Convert float samples to 16-bit signed little-endian PCM bytes.
///
/// Samples are clamped to [-1.0, 1.0] before scaling.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Split a PCM byte buffer into sub-64KB pieces and base64-encode each.
pub fn base64_chunks(pcm: &[u8]) -> Vec<String> {
    pcm.chunks(MAX_CHUNK_BYTES)
        .map(|chunk| base64::engine::general_purpose::STANDARD.encode(chunk))
        .collect()
}

/// Buffers pushed samples and emits base64-encoded PCM chunks downstream
/// once enough audio has accumulated.
///
/// The channel is unbounded so `push` never blocks the capture callback;
/// production rate equals real time, so the buffer cannot grow without bound.
pub struct ContinuousEncoder {
    buffer: Vec<u8>,
    emit_threshold: usize,
    tx: mpsc::UnboundedSender<String>,
}

impl ContinuousEncoder {
    /// Emit once roughly 100ms of 16kHz mono PCM has accumulated.
    pub const DEFAULT_EMIT_BYTES: usize = 3_200;

    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self::with_threshold(tx, Self::DEFAULT_EMIT_BYTES)
    }

    pub fn with_threshold(tx: mpsc::UnboundedSender<String>, emit_threshold: usize) -> Self {
        Self {
            buffer: Vec::new(),
            emit_threshold: emit_threshold.max(2),
            tx,
        }
    }

    /// Append samples; emits buffered chunks once the threshold is reached.
    pub fn push(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(&f32_to_pcm16(samples));
        if self.buffer.len() >= self.emit_threshold {
            self.emit();
        }
    }

    /// Emit any buffered remainder, regardless of threshold.
    pub fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.emit();
        }
    }

    fn emit(&mut self) {
        let pcm = std::mem::take(&mut self.buffer);
        for chunk in base64_chunks(&pcm) {
            if self.tx.send(chunk).is_err() {
                warn!("Encoder output channel closed; dropping audio chunk");
                return;
            }
        }
    }
}
