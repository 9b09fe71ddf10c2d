use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::aggregator::{EntryKind, TranscriptEntry, TranscriptStore};
use crate::dispatch::ProviderError;

/// External text-in/text-out summarization capability. Errors follow the
/// same fatal/transient contract as batch providers.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, ProviderError>;
}

/// Marks how much of the transcript has already been folded into a rolling
/// summary. Strictly monotonic: the position never rewinds, even when the
/// summarization call that advanced it failed (see `summarize_once`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryCursor {
    position: usize,
}

impl SummaryCursor {
    pub fn position(&self) -> usize {
        self.position
    }

    /// Advance to `end`; positions behind the cursor are ignored.
    pub fn advance_to(&mut self, end: usize) {
        if end > self.position {
            self.position = end;
        }
    }
}

/// Summarize everything appended since the cursor.
///
/// Scans `[cursor, end)`, skipping summary entries and blank text. The
/// cursor advances to the scanned end whether or not the summarization call
/// succeeds; a failed call's window is never re-scanned. No call is made
/// (and the cursor stays put) when the window is empty.
///
/// Returns true when a summarization call was made.
pub async fn summarize_once(
    store: &TranscriptStore,
    cursor: &mut SummaryCursor,
    summarizer: &dyn Summarizer,
) -> bool {
    let (window, end) = store.window_from(cursor.position());
    if window.is_empty() {
        return false;
    }

    let parts: Vec<&str> = window
        .iter()
        .filter(|e| e.kind != EntryKind::Summary)
        .map(|e| e.text.trim())
        .filter(|t| !t.is_empty())
        .collect();

    cursor.advance_to(end);

    if parts.is_empty() {
        return false;
    }
    let text = parts.join(" ");

    match summarizer.summarize(&text).await {
        Ok(summary) => {
            info!("Appending rolling summary ({} chars)", summary.len());
            store.append(TranscriptEntry::summary(summary));
        }
        Err(e) => {
            warn!("Summarization call failed; window skipped: {}", e);
        }
    }

    true
}

/// Fire `summarize_once` on a fixed cadence until aborted.
///
/// This timer is pipeline-global: stopping a capture session never cancels
/// it.
pub fn run_summary_timer(
    store: Arc<TranscriptStore>,
    summarizer: Arc<dyn Summarizer>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut cursor = SummaryCursor::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            summarize_once(&store, &mut cursor, summarizer.as_ref()).await;
        }
    })
}
