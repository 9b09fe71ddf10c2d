use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// What a transcript entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Interim text, superseded by the session's next final.
    Partial,
    /// Completed utterance (or a synthetic session marker with empty text).
    Final,
    /// Rolling summary; annotates the stream without affecting it.
    Summary,
}

/// A single entry in the ordered transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    /// Human-readable origin, frozen at append time (late results from a
    /// stopped session keep its final label).
    pub label: String,
    pub text: String,
    pub kind: EntryKind,
}

impl TranscriptEntry {
    pub fn new(
        session_id: impl Into<String>,
        label: impl Into<String>,
        text: impl Into<String>,
        kind: EntryKind,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            label: label.into(),
            text: text.into(),
            kind,
        }
    }

    pub fn partial(
        session_id: impl Into<String>,
        label: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(session_id, label, text, EntryKind::Partial)
    }

    pub fn completed(
        session_id: impl Into<String>,
        label: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(session_id, label, text, EntryKind::Final)
    }

    pub fn summary(text: impl Into<String>) -> Self {
        Self::new("", "summary", text, EntryKind::Summary)
    }

    /// Synthetic empty final entry marking session start/stop for audit.
    pub fn marker(session_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(session_id, label, "", EntryKind::Final)
    }
}

/// Ordered, append-only transcript store.
///
/// Entries are appended in delivery-completion order; reads return them in
/// timestamp order (stable, ties broken by insertion order). Append is the
/// only mutation, so concurrent sessions can share one store safely.
#[derive(Default)]
pub struct TranscriptStore {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its internal index.
    pub fn append(&self, entry: TranscriptEntry) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
        entries.len() - 1
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// All entries sorted by timestamp; the sort is stable, so entries with
    /// equal timestamps keep their insertion order.
    pub fn ordered_entries(&self) -> Vec<TranscriptEntry> {
        let mut entries = self.entries();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    /// Entries for display: a partial is dropped once the same session has
    /// appended a later final (superseded, never summed); summaries pass
    /// through untouched. Sorted by timestamp like `ordered_entries`.
    pub fn display_entries(&self) -> Vec<TranscriptEntry> {
        let entries = self.entries();

        // Insertion index of each session's last final entry.
        let mut last_final: HashMap<&str, usize> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            if entry.kind == EntryKind::Final {
                last_final.insert(entry.session_id.as_str(), i);
            }
        }

        let mut visible: Vec<TranscriptEntry> = entries
            .iter()
            .enumerate()
            .filter(|(i, entry)| {
                entry.kind != EntryKind::Partial
                    || last_final
                        .get(entry.session_id.as_str())
                        .is_none_or(|&f| f < *i)
            })
            .map(|(_, entry)| entry.clone())
            .collect();

        visible.sort_by_key(|e| e.timestamp);
        visible
    }

    /// Clone of `entries[start..]` plus the end index of the scan, for the
    /// summarization window. Entries appended after this call are untouched
    /// until the next window.
    pub fn window_from(&self, start: usize) -> (Vec<TranscriptEntry>, usize) {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let end = entries.len();
        let window = if start < end {
            entries[start..].to_vec()
        } else {
            Vec::new()
        };
        (window, end)
    }
}
