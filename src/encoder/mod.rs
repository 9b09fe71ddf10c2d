//! Frame encoding for both delivery paths
//!
//! - Continuous: float samples → 16-bit PCM → sub-64KB base64 chunks for
//!   embedding in protocol events.
//! - Segmented: float samples accumulated into overlapping, fixed-duration
//!   WAV segments for the batch dispatcher.

pub mod pcm;
pub mod segment;

pub use pcm::{base64_chunks, f32_to_pcm16, ContinuousEncoder, MAX_CHUNK_BYTES};
pub use segment::{Segment, Segmenter};
