use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::dispatch::{deliver_segment, BatchProvider, DeliveryContext, RetryPolicy};
use crate::queue::PendingQueue;
use crate::registry::CaptureRegistry;
use crate::status::{DeliveryStatus, StatusEvent};
use crate::transcript::{run_summary_timer, Summarizer, TranscriptStore};

/// Top-level seam held by the host application.
///
/// Owns the transcript store, the pending queue, the capture registry, the
/// registered batch providers, and the pipeline-global summarization timer.
/// Everything is instance state - two pipelines in one process never share
/// anything.
pub struct Pipeline {
    config: PipelineConfig,
    ctx: DeliveryContext,
    registry: CaptureRegistry,
    providers: RwLock<HashMap<String, Arc<dyn BatchProvider>>>,
    summary_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let (status_tx, _) = broadcast::channel(64);
        let ctx = DeliveryContext {
            policy: RetryPolicy {
                max_attempts: config.retry.max_attempts,
                base_delay: config.retry.base_delay(),
            },
            store: Arc::new(TranscriptStore::new()),
            queue: Arc::new(PendingQueue::new()),
            status_tx,
        };
        let registry = CaptureRegistry::new(ctx.clone(), config.segmenting.clone());

        Self {
            config,
            ctx,
            registry,
            providers: RwLock::new(HashMap::new()),
            summary_task: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.ctx.store
    }

    pub fn queue(&self) -> &Arc<PendingQueue> {
        &self.ctx.queue
    }

    pub fn registry(&self) -> &CaptureRegistry {
        &self.registry
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.ctx.status_tx.subscribe()
    }

    /// Make a batch provider available for dispatch and pending-queue
    /// redelivery.
    pub async fn register_provider(&self, provider: Arc<dyn BatchProvider>) {
        self.providers
            .write()
            .await
            .insert(provider.id().to_string(), provider);
    }

    pub async fn provider(&self, provider_id: &str) -> Option<Arc<dyn BatchProvider>> {
        self.providers.read().await.get(provider_id).cloned()
    }

    /// Start (or restart) the rolling-summary timer.
    pub fn start_summarizer(&self, summarizer: Arc<dyn Summarizer>) {
        let task = run_summary_timer(
            Arc::clone(&self.ctx.store),
            summarizer,
            self.config.summary.interval(),
        );
        let mut slot = self.summary_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Connectivity restored: re-dispatch every pending item in FIFO order.
    ///
    /// Items are processed sequentially so redelivered transcripts land in
    /// their original enqueue order. A renewed transient exhaustion
    /// re-enqueues the item (it shows up in the next drain); only fatal
    /// failures drop it.
    pub async fn on_connectivity_restored(&self) -> usize {
        let items = self.ctx.queue.drain_all();
        if items.is_empty() {
            return 0;
        }
        info!("Connectivity restored; redelivering {} items", items.len());

        let mut drained = 0;
        for item in items {
            let Some(provider) = self.provider(&item.provider_id).await else {
                warn!(
                    "No provider '{}' registered for queued segment {}; dropping",
                    item.provider_id, item.segment.sequence
                );
                let _ = self.ctx.status_tx.send(StatusEvent::new(
                    Some(item.segment.session_id.clone()),
                    DeliveryStatus::Error,
                    format!("provider '{}' not registered", item.provider_id),
                ));
                continue;
            };

            deliver_segment(
                provider.as_ref(),
                item.segment,
                &item.label,
                item.attempt,
                &self.ctx,
            )
            .await;
            drained += 1;
        }
        drained
    }

    /// Stop every session and the summary timer.
    pub async fn shutdown(&self) {
        if let Err(e) = self.registry.stop_all().await {
            warn!("Failed to stop all sessions during shutdown: {}", e);
        }
        let task = self
            .summary_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}
