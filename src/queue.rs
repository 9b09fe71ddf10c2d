use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::info;

use crate::encoder::Segment;

/// A segment plus delivery metadata, parked after a transient failure
/// exhausted its in-line retries (or while offline).
#[derive(Debug, Clone)]
pub struct PendingItem {
    pub segment: Segment,
    pub provider_id: String,
    /// Session label frozen at enqueue time.
    pub label: String,
    /// Number of delivery cycles already spent on this segment.
    pub attempt: u32,
    pub last_error: Option<String>,
}

/// Process-wide FIFO buffer of delivery attempts that failed transiently.
///
/// Entries outlive the session that produced them; the queue never drops an
/// item except on fatal failure or an explicit clear. Unbounded: a
/// permanently offline pipeline accumulates items.
#[derive(Default)]
pub struct PendingQueue {
    items: Mutex<VecDeque<PendingItem>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, item: PendingItem) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        info!(
            "Queued segment {} of session {} for redelivery (attempt {})",
            item.segment.sequence, item.segment.session_id, item.attempt
        );
        items.push_back(item);
    }

    /// Atomically remove and return all queued items in FIFO order.
    ///
    /// An enqueue racing with a drain is never lost: it lands in the fresh
    /// deque and shows up in the next drain instead of the current one.
    pub fn drain_all(&self) -> Vec<PendingItem> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *items).into()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued item. Explicit session clear only.
    pub fn clear(&self) {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
