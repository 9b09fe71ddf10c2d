//! Batch transcription dispatch
//!
//! Per-provider adapters behind a trait, a declarative fatal/transient
//! classifier, and a bounded exponential-backoff retry loop. Transient
//! exhaustion hands the segment to the pending queue; fatal failures are
//! terminal on the first attempt.

pub mod provider;
pub mod retry;

pub use provider::{BatchProvider, ErrorClass, ProviderError, StatusClassifier};
pub use retry::{deliver_segment, dispatch, DeliveryContext, DispatchOutcome, RetryPolicy};
