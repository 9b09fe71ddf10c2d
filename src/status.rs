use serde::Serialize;

/// Structured delivery state the host maps onto its own status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Capture running, deliveries flowing.
    Active,
    /// A delivery exhausted its transient retries and is parked for redelivery.
    Queued,
    /// A fatal or protocol failure was surfaced.
    Error,
    /// Session torn down.
    Stopped,
}

/// One status transition, broadcast to whoever is listening.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub session_id: Option<String>,
    pub status: DeliveryStatus,
    pub detail: String,
}

impl StatusEvent {
    pub fn new(
        session_id: Option<String>,
        status: DeliveryStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            status,
            detail: detail.into(),
        }
    }
}
