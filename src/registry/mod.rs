//! Capture session registry
//!
//! Tracks the lifecycle of each active audio source and its wiring:
//! - One encoder per session
//! - Streaming mode: continuous PCM into a shared protocol client
//! - Segmented mode: overlapping segments into the batch dispatcher
//! - Idempotent stop with flush and synthetic start/stop markers

mod session;
mod source;

pub use session::{CaptureSession, DeliveryMode};
pub use source::AudioSource;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use crate::config::SegmentingConfig;
use crate::dispatch::DeliveryContext;
use crate::error::PipelineError;
use crate::status::{DeliveryStatus, StatusEvent};
use crate::transcript::TranscriptEntry;

/// Owns every active capture session.
///
/// Sessions are exclusive to the registry; the shared dispatcher context and
/// protocol client are only referenced. An explicit registry instance (no
/// process-wide globals) keeps independent pipelines and test fakes cheap.
pub struct CaptureRegistry {
    sessions: RwLock<HashMap<String, Arc<CaptureSession>>>,
    /// Ids of sessions whose stop has begun, so a second stop stays a
    /// no-op while a never-issued id is still caller misuse.
    stopped: StdMutex<HashSet<String>>,
    ctx: DeliveryContext,
    segmenting: SegmentingConfig,
}

impl CaptureRegistry {
    pub fn new(ctx: DeliveryContext, segmenting: SegmentingConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            stopped: StdMutex::new(HashSet::new()),
            ctx,
            segmenting,
        }
    }

    /// Start capturing from a source. Allocates the session's encoder, wires
    /// the delivery path for `mode`, and emits a synthetic start marker.
    pub async fn start_session(
        &self,
        source: Box<dyn AudioSource>,
        label: &str,
        mode: DeliveryMode,
    ) -> anyhow::Result<String> {
        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        info!("Starting capture session {} ({})", session_id, label);

        let session = CaptureSession::start(
            session_id.clone(),
            label.to_string(),
            source,
            mode,
            self.ctx.clone(),
            &self.segmenting,
        )
        .await?;

        self.ctx
            .store
            .append(TranscriptEntry::marker(&session_id, label));
        let _ = self.ctx.status_tx.send(StatusEvent::new(
            Some(session_id.clone()),
            DeliveryStatus::Active,
            format!("capture started ({})", label),
        ));

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::new(session));

        Ok(session_id)
    }

    /// Stop a session: flush and dispatch the unsealed segment, finalize any
    /// in-flight utterance on the protocol client, emit the stop marker.
    ///
    /// Idempotent for sessions that were already stopped; an id that never
    /// existed is a programming error. In-flight dispatcher retries for
    /// segments already handed off are left to complete on their own.
    pub async fn stop_session(&self, session_id: &str) -> Result<(), PipelineError> {
        let session = self.sessions.write().await.remove(session_id);

        let Some(session) = session else {
            let stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
            if stopped.contains(session_id) {
                return Ok(());
            }
            return Err(PipelineError::UnknownSession(session_id.to_string()));
        };

        // Mark the id stopped before the flush; a second stop arriving
        // while this one is still tearing down reads it as already handled.
        self.stopped
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string());

        info!("Stopping capture session {}", session_id);
        session.stop().await;

        self.ctx
            .store
            .append(TranscriptEntry::marker(session_id, session.label()));
        let _ = self.ctx.status_tx.send(StatusEvent::new(
            Some(session_id.to_string()),
            DeliveryStatus::Stopped,
            "capture stopped",
        ));
        Ok(())
    }

    pub async fn list_active(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Stop every active session; used on pipeline shutdown.
    pub async fn stop_all(&self) -> Result<(), PipelineError> {
        for session_id in self.list_active().await {
            self.stop_session(&session_id).await?;
        }
        Ok(())
    }

    /// Subscribe to session/delivery status transitions.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.ctx.status_tx.subscribe()
    }
}
