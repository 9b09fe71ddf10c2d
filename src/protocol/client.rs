use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::bus::{EventBus, HandlerId};
use super::events::{event_types, Direction, ProtocolEvent};
use super::transport::{StreamingTransport, WsTransport};
use crate::config::StreamingConfig;
use crate::encoder::base64_chunks;
use crate::error::PipelineError;

/// Connection lifecycle; `Active` means the session negotiation has been
/// acknowledged by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Active,
    Closed,
    Errored,
}

/// The session parameters sent during negotiation.
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    pub model: String,
    pub input_format: String,
    pub noise_reduction: String,
    /// "automatic" (server-side VAD) or "explicit" (caller commits turns).
    pub turn_detection: String,
}

impl SessionDescriptor {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            model: config.model.clone(),
            input_format: config.input_format.clone(),
            noise_reduction: config.noise_reduction.clone(),
            turn_detection: config.turn_detection.clone(),
        }
    }

    fn to_session_value(&self) -> Value {
        json!({
            "model": self.model,
            "input_format": self.input_format,
            "noise_reduction": self.noise_reduction,
            "turn_detection": self.turn_detection,
        })
    }
}

/// Persistent, single-connection duplex streaming client.
///
/// Every inbound frame is dispatched synchronously through the client's own
/// event bus - handlers for one event run to completion before the next
/// frame is processed, while outbound sends stay independent of the inbound
/// path. The client never reconnects on its own; a transport failure
/// surfaces as a local `connection.closed` event and reconnection is the
/// caller's call, coordinated with the pending-queue drain.
pub struct StreamingClient {
    transport: Arc<dyn StreamingTransport>,
    bus: Arc<Mutex<EventBus>>,
    state: Arc<Mutex<ConnectionState>>,
    session: Mutex<Value>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingClient {
    /// Open the streaming endpoint from config and negotiate a session.
    pub async fn connect_ws(config: &StreamingConfig) -> Result<Arc<Self>, PipelineError> {
        let transport = WsTransport::connect(&config.url, &config.api_key).await?;
        Self::connect(
            Arc::new(transport),
            SessionDescriptor::from_config(config),
            config.negotiation_timeout(),
        )
        .await
    }

    /// Negotiate a session over an already-opened transport.
    ///
    /// The client counts as `Active` only once the server acknowledges the
    /// negotiation; the wait is bounded by `negotiation_timeout`.
    pub async fn connect(
        transport: Arc<dyn StreamingTransport>,
        descriptor: SessionDescriptor,
        negotiation_timeout: Duration,
    ) -> Result<Arc<Self>, PipelineError> {
        let client = Arc::new(Self {
            transport,
            bus: Arc::new(Mutex::new(EventBus::new())),
            state: Arc::new(Mutex::new(ConnectionState::Connecting)),
            session: Mutex::new(descriptor.to_session_value()),
            reader: Mutex::new(None),
        });

        client.spawn_reader();
        client.set_state(ConnectionState::Connected);

        // Register the ack waiter before the negotiation goes out, so a fast
        // server reply cannot be missed.
        let (ack_id, ack_rx) = client.subscribe_once(event_types::SESSION_UPDATED);

        let session = client.lock_session().clone();
        client
            .send_event(event_types::SESSION_UPDATE, json!({ "session": session }))
            .await?;

        match tokio::time::timeout(negotiation_timeout, ack_rx).await {
            Ok(Ok(_ack)) => {
                client.set_state(ConnectionState::Active);
                info!("Streaming session negotiated");
                Ok(client)
            }
            Ok(Err(_)) => {
                client.disconnect().await;
                Err(PipelineError::Negotiation(
                    "connection ended before acknowledgement".to_string(),
                ))
            }
            Err(_) => {
                let _ = client
                    .lock_bus()
                    .off(event_types::SESSION_UPDATED, Some(ack_id));
                client.disconnect().await;
                Err(PipelineError::WaitTimeout(
                    event_types::SESSION_UPDATED.to_string(),
                    negotiation_timeout,
                ))
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the negotiated session uses server-side voice activity
    /// detection. When it does, the client never commits on its own and
    /// callers are expected not to either.
    pub fn automatic_turns(&self) -> bool {
        self.lock_session()
            .get("turn_detection")
            .and_then(Value::as_str)
            == Some("automatic")
    }

    /// Register a handler for an event type (or pseudo-type).
    ///
    /// The bus stays locked while handlers run: a handler that calls
    /// `on`/`once`/`off` or sends an event on this client deadlocks.
    pub fn on(
        &self,
        event_type: &str,
        handler: impl FnMut(&ProtocolEvent) + Send + 'static,
    ) -> HandlerId {
        self.lock_bus().on(event_type, handler)
    }

    /// Register a handler removed after its first invocation.
    pub fn once(
        &self,
        event_type: &str,
        handler: impl FnMut(&ProtocolEvent) + Send + 'static,
    ) -> HandlerId {
        self.lock_bus().once(event_type, handler)
    }

    /// Remove one handler, or all handlers for a type when `handler` is
    /// `None`. Removing a never-registered handler is a programming error.
    pub fn off(&self, event_type: &str, handler: Option<HandlerId>) -> Result<(), PipelineError> {
        self.lock_bus().off(event_type, handler)
    }

    /// Resolve with the next event of the given type, or fail after
    /// `timeout`.
    pub async fn wait_for_next(
        &self,
        event_type: &str,
        timeout: Duration,
    ) -> Result<ProtocolEvent, PipelineError> {
        let (id, rx) = self.subscribe_once(event_type);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(PipelineError::Transport(
                "event stream ended while waiting".to_string(),
            )),
            Err(_) => {
                let _ = self.lock_bus().off(event_type, Some(id));
                Err(PipelineError::WaitTimeout(event_type.to_string(), timeout))
            }
        }
    }

    /// Send PCM bytes as one or more base64 append events. Zero-length
    /// input is a no-op.
    pub async fn append_audio(&self, pcm: &[u8]) -> Result<(), PipelineError> {
        if pcm.is_empty() {
            return Ok(());
        }
        for chunk in base64_chunks(pcm) {
            self.append_chunk(chunk).await?;
        }
        Ok(())
    }

    /// Send one already base64-encoded PCM chunk.
    pub async fn append_chunk(&self, chunk: String) -> Result<(), PipelineError> {
        self.send_event(event_types::AUDIO_APPEND, json!({ "audio": chunk }))
            .await
    }

    /// Explicit turn boundary, for sessions not using automatic turn
    /// detection.
    pub async fn commit(&self) -> Result<(), PipelineError> {
        self.send_event(event_types::AUDIO_COMMIT, json!({})).await
    }

    /// Abandon the provider's in-flight response.
    pub async fn cancel_response(&self) -> Result<(), PipelineError> {
        self.send_event(event_types::RESPONSE_CANCEL, json!({}))
            .await
    }

    /// Deep-merge a partial config into the negotiated session and, when
    /// connected, re-send the negotiation.
    pub async fn update_session(&self, patch: &Value) -> Result<(), PipelineError> {
        let merged = {
            let mut session = self.lock_session();
            deep_merge(&mut session, patch);
            session.clone()
        };

        if matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Active
        ) {
            self.send_event(event_types::SESSION_UPDATE, json!({ "session": merged }))
                .await?;
        }
        Ok(())
    }

    /// Close the connection. Safe to call from any state and idempotent.
    pub async fn disconnect(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = reader {
            handle.abort();
        }
        self.finish(false);
        self.transport.close().await;
    }

    /// Build, locally dispatch, then write one client event. Local dispatch
    /// happens before the transport write so observers see client intent
    /// even if the write later fails.
    async fn send_event(&self, event_type: &str, payload: Value) -> Result<(), PipelineError> {
        let event = ProtocolEvent::client(event_type, payload);
        let frame = event.to_wire();
        self.lock_bus().dispatch(&event);
        self.transport.send(frame).await
    }

    fn subscribe_once(&self, event_type: &str) -> (HandlerId, oneshot::Receiver<ProtocolEvent>) {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let id = self.lock_bus().once(event_type, move |event| {
            if let Some(tx) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                let _ = tx.send(event.clone());
            }
        });
        (id, rx)
    }

    fn spawn_reader(self: &Arc<Self>) {
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match client.transport.next_frame().await {
                    Some(Ok(text)) => {
                        let Some(event) = ProtocolEvent::from_wire(&text) else {
                            warn!("Dropping unparseable inbound frame");
                            continue;
                        };
                        if event.event_type == event_types::SESSION_UPDATED
                            && client.state() == ConnectionState::Connected
                        {
                            client.set_state(ConnectionState::Active);
                        }
                        // Handlers run to completion before the next frame
                        // is read.
                        client.lock_bus().dispatch(&event);
                    }
                    Some(Err(e)) => {
                        error!("Streaming transport failed: {}", e);
                        client.finish(true);
                        break;
                    }
                    None => {
                        info!("Streaming transport closed by peer");
                        client.finish(false);
                        break;
                    }
                }
            }
        });
        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Transition to a terminal state and fire the local closed event,
    /// exactly once.
    fn finish(&self, errored: bool) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(*state, ConnectionState::Closed | ConnectionState::Errored) {
                return;
            }
            *state = if errored {
                ConnectionState::Errored
            } else {
                ConnectionState::Closed
            };
        }

        let closed = ProtocolEvent {
            id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            event_type: event_types::CONNECTION_CLOSED.to_string(),
            direction: Direction::Server,
            payload: json!({ "error": errored }),
            time: chrono::Utc::now(),
        };
        self.lock_bus().dispatch(&closed);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn lock_bus(&self) -> MutexGuard<'_, EventBus> {
        self.bus.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_session(&self) -> MutexGuard<'_, Value> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Recursively merge `patch` into `base`: object fields merge, everything
/// else is replaced.
fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                deep_merge(base_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}
