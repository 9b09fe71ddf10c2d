//! Transcript aggregation and rolling summarization
//!
//! This module provides the ordered transcript store and the periodic
//! summarization cursor:
//! - Append-only store shared by every delivery path
//! - Timestamp-ordered reads with partial/final supersession
//! - Windowed summarization on a pipeline-global timer

mod aggregator;
mod summarizer;

pub use aggregator::{EntryKind, TranscriptEntry, TranscriptStore};
pub use summarizer::{run_summary_timer, summarize_once, SummaryCursor, Summarizer};
