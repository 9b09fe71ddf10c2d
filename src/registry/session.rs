use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::source::AudioSource;
use crate::config::SegmentingConfig;
use crate::dispatch::{deliver_segment, BatchProvider, DeliveryContext};
use crate::encoder::{ContinuousEncoder, Segmenter};
use crate::protocol::{event_types, HandlerId, StreamingClient};
use crate::transcript::TranscriptEntry;

/// How a session's encoded audio reaches a provider.
pub enum DeliveryMode {
    /// Continuous PCM frames into a shared streaming protocol client
    /// (referenced, not owned).
    Streaming(Arc<StreamingClient>),
    /// Periodic overlapping segments through a batch provider.
    Segmented(Arc<dyn BatchProvider>),
}

/// One tracked audio source with its encode/deliver pipeline.
///
/// The session owns its encoder and pump task; stopping it cancels those but
/// never the deliveries already handed to the dispatcher - late results are
/// legal and keep the session's final label.
pub struct CaptureSession {
    id: String,
    label: String,
    started_at: DateTime<Utc>,
    source: Mutex<Box<dyn AudioSource>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Streaming-mode wiring to undo at stop: the shared client plus the
    /// transcript handlers registered for this session.
    streaming: Option<(Arc<StreamingClient>, Vec<(&'static str, HandlerId)>)>,
}

impl CaptureSession {
    pub(super) async fn start(
        id: String,
        label: String,
        mut source: Box<dyn AudioSource>,
        mode: DeliveryMode,
        ctx: DeliveryContext,
        segmenting: &SegmentingConfig,
    ) -> anyhow::Result<Self> {
        let samples_rx = source.subscribe().await?;

        let (pump, streaming) = match mode {
            DeliveryMode::Streaming(client) => {
                let handlers = Self::wire_transcripts(&client, &id, &label, &ctx);
                let pump = tokio::spawn(Self::run_streaming(
                    samples_rx,
                    Arc::clone(&client),
                    id.clone(),
                ));
                (pump, Some((client, handlers)))
            }
            DeliveryMode::Segmented(provider) => {
                let segmenter = Segmenter::new(id.clone(), segmenting);
                let pump = tokio::spawn(Self::run_segmented(
                    samples_rx,
                    segmenter,
                    provider,
                    label.clone(),
                    ctx,
                ));
                (pump, None)
            }
        };

        Ok(Self {
            id,
            label,
            started_at: Utc::now(),
            source: Mutex::new(source),
            pump: Mutex::new(Some(pump)),
            streaming,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Tear down: end the sample stream, wait for the pump to flush, then
    /// finalize the streaming turn and detach this session's handlers.
    pub(super) async fn stop(&self) {
        self.source.lock().await.unsubscribe().await;

        let pump = self.pump.lock().await.take();
        if let Some(handle) = pump {
            if let Err(e) = handle.await {
                error!("Session {} pump task panicked: {}", self.id, e);
            }
        }

        if let Some((client, handlers)) = &self.streaming {
            // Tell the provider the turn ended so an in-flight utterance is
            // finalized; with server-side VAD the commit stays with the
            // server.
            if !client.automatic_turns() {
                if let Err(e) = client.commit().await {
                    warn!("Session {} final commit failed: {}", self.id, e);
                }
            }
            for (event_type, handler_id) in handlers {
                let _ = client.off(event_type, Some(*handler_id));
            }
        }
    }

    /// Register this session's transcript listeners on the shared client.
    fn wire_transcripts(
        client: &StreamingClient,
        session_id: &str,
        label: &str,
        ctx: &DeliveryContext,
    ) -> Vec<(&'static str, HandlerId)> {
        let mut handlers = Vec::new();

        let store = Arc::clone(&ctx.store);
        let (sid, lbl) = (session_id.to_string(), label.to_string());
        let delta_id = client.on(event_types::TRANSCRIPT_DELTA, move |event| {
            if let Some(text) = event.text_field("text") {
                store.append(TranscriptEntry::partial(&sid, &lbl, text));
            }
        });
        handlers.push((event_types::TRANSCRIPT_DELTA, delta_id));

        let store = Arc::clone(&ctx.store);
        let (sid, lbl) = (session_id.to_string(), label.to_string());
        let completed_id = client.on(event_types::TRANSCRIPT_COMPLETED, move |event| {
            if let Some(text) = event.text_field("text") {
                store.append(TranscriptEntry::completed(&sid, &lbl, text));
            }
        });
        handlers.push((event_types::TRANSCRIPT_COMPLETED, completed_id));

        handlers
    }

    /// Streaming pump: batch sample callbacks through the continuous
    /// encoder and append the emitted chunks until the source ends.
    async fn run_streaming(
        mut samples_rx: mpsc::Receiver<Vec<f32>>,
        client: Arc<StreamingClient>,
        session_id: String,
    ) {
        info!("Streaming pump started for {}", session_id);

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        let mut encoder = ContinuousEncoder::new(chunk_tx);

        'pump: while let Some(samples) = samples_rx.recv().await {
            encoder.push(&samples);
            while let Ok(chunk) = chunk_rx.try_recv() {
                if let Err(e) = client.append_chunk(chunk).await {
                    // Connection gone; reconnection is the caller's decision.
                    warn!("Session {} append failed, pump stopping: {}", session_id, e);
                    break 'pump;
                }
            }
        }

        // Push out whatever is still below the emit threshold.
        encoder.flush();
        while let Ok(chunk) = chunk_rx.try_recv() {
            if let Err(e) = client.append_chunk(chunk).await {
                warn!("Session {} final append failed: {}", session_id, e);
                break;
            }
        }

        info!("Streaming pump stopped for {}", session_id);
    }

    /// Segmented pump: feed samples through the segmenter and hand every
    /// sealed segment to its own delivery task, so a backoff sleep for one
    /// segment never stalls capture.
    async fn run_segmented(
        mut samples_rx: mpsc::Receiver<Vec<f32>>,
        mut segmenter: Segmenter,
        provider: Arc<dyn BatchProvider>,
        label: String,
        ctx: DeliveryContext,
    ) {
        while let Some(samples) = samples_rx.recv().await {
            match segmenter.push(&samples) {
                Ok(sealed) => {
                    for segment in sealed {
                        Self::spawn_delivery(&provider, segment, &label, &ctx);
                    }
                }
                Err(e) => error!("Segment sealing failed: {}", e),
            }
        }

        // Source ended: seal whatever audio remains so the tail is delivered.
        match segmenter.flush() {
            Ok(Some(segment)) => Self::spawn_delivery(&provider, segment, &label, &ctx),
            Ok(None) => {}
            Err(e) => error!("Final segment flush failed: {}", e),
        }
    }

    /// Deliveries are detached tasks: stopping the session lets them run to
    /// completion or exhaustion.
    fn spawn_delivery(
        provider: &Arc<dyn BatchProvider>,
        segment: crate::encoder::Segment,
        label: &str,
        ctx: &DeliveryContext,
    ) {
        let provider = Arc::clone(provider);
        let label = label.to_string();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            deliver_segment(provider.as_ref(), segment, &label, 0, &ctx).await;
        });
    }
}
