use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::provider::BatchProvider;
use crate::encoder::Segment;
use crate::queue::{PendingItem, PendingQueue};
use crate::status::{DeliveryStatus, StatusEvent};
use crate::transcript::{TranscriptEntry, TranscriptStore};

/// Bounded exponential-backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` (1-based): base * 2^(attempt-1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Terminal result of dispatching one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success(String),
    /// Never retried; surfaced to the caller's status channel.
    Fatal(String),
    /// Retries exhausted; the caller parks the segment in the pending queue.
    TransientExhausted(String),
}

/// Deliver one segment through a provider with in-line retries.
///
/// Fatal errors return after a single attempt. Transient errors are retried
/// up to `policy.max_attempts` with exponential backoff; the waits are
/// non-blocking, so other sessions and the streaming connection keep running
/// during a backoff sleep. Blank recognized text is fatal: there is nothing
/// to show, and retrying will not change provider-side silence.
pub async fn dispatch(
    provider: &dyn BatchProvider,
    segment: &Segment,
    policy: RetryPolicy,
) -> DispatchOutcome {
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match provider.transcribe(segment).await {
            Ok(text) => {
                if text.trim().is_empty() {
                    return DispatchOutcome::Fatal("provider returned empty text".to_string());
                }
                info!(
                    "Segment {} of {} transcribed on attempt {}",
                    segment.sequence, segment.session_id, attempt
                );
                return DispatchOutcome::Success(text);
            }
            Err(e) if e.is_fatal() => {
                error!(
                    "Fatal delivery failure for segment {} of {}: {}",
                    segment.sequence, segment.session_id, e.message
                );
                return DispatchOutcome::Fatal(e.message);
            }
            Err(e) => {
                if attempt == max_attempts {
                    warn!(
                        "Transient failure exhausted {} attempts for segment {} of {}: {}",
                        max_attempts, segment.sequence, segment.session_id, e.message
                    );
                    return DispatchOutcome::TransientExhausted(e.message);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    "Transient failure on attempt {} for segment {} of {}; retrying in {:?}: {}",
                    attempt, segment.sequence, segment.session_id, delay, e.message
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    // max_attempts >= 1, so the loop always returns.
    unreachable!("retry loop returned without an outcome")
}

/// Shared wiring for delivery tasks: where results land, where transient
/// exhaustion parks segments, and where failures are announced.
#[derive(Clone)]
pub struct DeliveryContext {
    pub policy: RetryPolicy,
    pub store: Arc<TranscriptStore>,
    pub queue: Arc<PendingQueue>,
    pub status_tx: broadcast::Sender<StatusEvent>,
}

/// Dispatch a segment and route the outcome: success appends a final
/// transcript entry, transient exhaustion parks the segment in the pending
/// queue, fatal goes out the status channel.
pub async fn deliver_segment(
    provider: &dyn BatchProvider,
    segment: Segment,
    label: &str,
    prior_attempts: u32,
    ctx: &DeliveryContext,
) {
    let session_id = segment.session_id.clone();

    match dispatch(provider, &segment, ctx.policy).await {
        DispatchOutcome::Success(text) => {
            ctx.store
                .append(TranscriptEntry::completed(&session_id, label, text));
        }
        DispatchOutcome::Fatal(message) => {
            let _ = ctx.status_tx.send(StatusEvent::new(
                Some(session_id),
                DeliveryStatus::Error,
                message,
            ));
        }
        DispatchOutcome::TransientExhausted(message) => {
            ctx.queue.enqueue(PendingItem {
                segment,
                provider_id: provider.id().to_string(),
                label: label.to_string(),
                attempt: prior_attempts + ctx.policy.max_attempts.max(1),
                last_error: Some(message.clone()),
            });
            let _ = ctx.status_tx.send(StatusEvent::new(
                Some(session_id),
                DeliveryStatus::Queued,
                message,
            ));
        }
    }
}
