use std::time::Duration;
use thiserror::Error;

/// Library error taxonomy.
///
/// Programming errors (unknown session id, removing a handler that was never
/// registered) are returned synchronously and indicate caller misuse; they
/// are never retried. Transport and negotiation failures surface as
/// connection-state events, not per-segment failures.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("no handler registered for event type '{0}'")]
    HandlerNotRegistered(String),

    #[error("timed out waiting for '{0}' after {1:?}")]
    WaitTimeout(String, Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session negotiation failed: {0}")]
    Negotiation(String),
}
