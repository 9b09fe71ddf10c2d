// Streaming client tests over an in-memory transport.

use anyhow::Result;
use scribeline::protocol::{
    event_types, ConnectionState, ProtocolEvent, SessionDescriptor, StreamingClient,
    StreamingTransport, CLIENT_EVENT, SERVER_EVENT,
};
use scribeline::config::PipelineConfig;
use scribeline::registry::{AudioSource, DeliveryMode};
use scribeline::{Pipeline, PipelineError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Transport backed by channels: frames the client sends land on
/// `outbound`, frames pushed into `inbound` reach the client's reader.
/// Dropping the inbound sender looks like a clean close by the peer.
struct FakeTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<String, PipelineError>>>,
    fail_sends: AtomicBool,
}

impl FakeTransport {
    fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<Result<String, PipelineError>>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            outbound: out_tx,
            inbound: tokio::sync::Mutex::new(in_rx),
            fail_sends: AtomicBool::new(false),
        });
        (transport, out_rx, in_tx)
    }
}

#[async_trait::async_trait]
impl StreamingTransport for FakeTransport {
    async fn send(&self, frame: String) -> Result<(), PipelineError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PipelineError::Transport("send failed".to_string()));
        }
        let _ = self.outbound.send(frame);
        Ok(())
    }

    async fn next_frame(&self) -> Option<Result<String, PipelineError>> {
        self.inbound.lock().await.recv().await
    }

    async fn close(&self) {}
}

fn descriptor(turn_detection: &str) -> SessionDescriptor {
    SessionDescriptor {
        model: "scribe-1".to_string(),
        input_format: "pcm16".to_string(),
        noise_reduction: "near_field".to_string(),
        turn_detection: turn_detection.to_string(),
    }
}

fn server_frame(event_type: &str, mut fields: Value) -> String {
    fields["type"] = json!(event_type);
    fields["event_id"] = json!("evt_server");
    fields.to_string()
}

/// Connect a client against the fake transport, answering the negotiation
/// like a well-behaved server. Returns the negotiation frame for
/// inspection alongside the channel ends.
async fn connected_client(
    turn_detection: &str,
) -> Result<(
    Arc<StreamingClient>,
    Arc<FakeTransport>,
    Value,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedSender<Result<String, PipelineError>>,
)> {
    let (transport, mut out_rx, in_tx) = FakeTransport::new();

    let ack_tx = in_tx.clone();
    let server = tokio::spawn(async move {
        let frame = out_rx.recv().await.expect("no negotiation frame");
        let parsed: Value = serde_json::from_str(&frame).expect("unparseable frame");
        assert_eq!(parsed["type"], event_types::SESSION_UPDATE);
        let _ = ack_tx.send(Ok(server_frame(event_types::SESSION_UPDATED, json!({}))));
        (parsed, out_rx)
    });

    let client = StreamingClient::connect(
        Arc::clone(&transport) as Arc<dyn StreamingTransport>,
        descriptor(turn_detection),
        Duration::from_secs(1),
    )
    .await?;

    let (negotiation, out_rx) = server.await?;
    Ok((client, transport, negotiation, out_rx, in_tx))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 1s");
}

#[tokio::test]
async fn negotiation_acknowledgement_activates_the_client() -> Result<()> {
    let (client, _transport, negotiation, _out_rx, _in_tx) = connected_client("automatic").await?;

    assert_eq!(client.state(), ConnectionState::Active);
    assert!(client.automatic_turns());
    assert_eq!(negotiation["session"]["model"], "scribe-1");
    assert_eq!(negotiation["session"]["turn_detection"], "automatic");
    Ok(())
}

#[tokio::test]
async fn negotiation_without_acknowledgement_times_out() {
    let (transport, _out_rx, _in_tx) = FakeTransport::new();

    let result = StreamingClient::connect(
        transport as Arc<dyn StreamingTransport>,
        descriptor("automatic"),
        Duration::from_millis(50),
    )
    .await;

    match result {
        Err(PipelineError::WaitTimeout(event_type, _)) => {
            assert_eq!(event_type, event_types::SESSION_UPDATED);
        }
        Err(other) => panic!("expected negotiation timeout, got {other:?}"),
        Ok(_) => panic!("expected negotiation timeout, connect succeeded"),
    }
}

#[tokio::test]
async fn wait_for_next_times_out_and_unregisters_its_handler() -> Result<()> {
    let (client, _transport, _negotiation, _out_rx, _in_tx) = connected_client("automatic").await?;

    let result = client
        .wait_for_next(event_types::TRANSCRIPT_COMPLETED, Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(PipelineError::WaitTimeout(_, _))));

    // The expired waiter is gone, so clearing the type finds nothing.
    assert!(matches!(
        client.off(event_types::TRANSCRIPT_COMPLETED, None),
        Err(PipelineError::HandlerNotRegistered(_))
    ));
    Ok(())
}

#[tokio::test]
async fn off_removes_one_handler_and_rejects_unknown_ones() -> Result<()> {
    let (client, _transport, _negotiation, _out_rx, in_tx) = connected_client("automatic").await?;

    let first_hits = Arc::new(AtomicU32::new(0));
    let second_hits = Arc::new(AtomicU32::new(0));

    let hits = Arc::clone(&first_hits);
    let first = client.on(event_types::TRANSCRIPT_DELTA, move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
    });
    let hits = Arc::clone(&second_hits);
    let _second = client.on(event_types::TRANSCRIPT_DELTA, move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
    });

    client.off(event_types::TRANSCRIPT_DELTA, Some(first))?;
    // Removing it again is a programming error.
    assert!(matches!(
        client.off(event_types::TRANSCRIPT_DELTA, Some(first)),
        Err(PipelineError::HandlerNotRegistered(_))
    ));
    assert!(matches!(
        client.off("never.registered", None),
        Err(PipelineError::HandlerNotRegistered(_))
    ));

    in_tx.send(Ok(server_frame(
        event_types::TRANSCRIPT_DELTA,
        json!({"text": "hel"}),
    )))?;

    let hits = Arc::clone(&second_hits);
    wait_until(move || hits.load(Ordering::SeqCst) == 1).await;
    assert_eq!(first_hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn dispatch_runs_exact_handlers_then_the_generic_stream() -> Result<()> {
    let (client, _transport, _negotiation, _out_rx, in_tx) = connected_client("automatic").await?;

    let order = Arc::new(Mutex::new(Vec::new()));
    for (event_type, tag) in [
        (event_types::TRANSCRIPT_COMPLETED, "exact-first"),
        (SERVER_EVENT, "generic"),
        (event_types::TRANSCRIPT_COMPLETED, "exact-second"),
    ] {
        let order = Arc::clone(&order);
        client.on(event_type, move |_| {
            order.lock().unwrap().push(tag);
        });
    }

    in_tx.send(Ok(server_frame(
        event_types::TRANSCRIPT_COMPLETED,
        json!({"text": "hello"}),
    )))?;

    let seen = Arc::clone(&order);
    wait_until(move || seen.lock().unwrap().len() == 3).await;
    assert_eq!(
        *order.lock().unwrap(),
        vec!["exact-first", "exact-second", "generic"]
    );
    Ok(())
}

#[tokio::test]
async fn client_events_dispatch_locally_even_when_the_write_fails() -> Result<()> {
    let (client, transport, _negotiation, _out_rx, _in_tx) = connected_client("explicit").await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    client.on(CLIENT_EVENT, move |event: &ProtocolEvent| {
        log.lock().unwrap().push(event.event_type.clone());
    });

    transport.fail_sends.store(true, Ordering::SeqCst);
    assert!(matches!(
        client.commit().await,
        Err(PipelineError::Transport(_))
    ));

    // The local dispatch happened before the write was attempted.
    assert_eq!(
        *seen.lock().unwrap(),
        vec![event_types::AUDIO_COMMIT.to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn append_audio_encodes_pcm_and_skips_empty_input() -> Result<()> {
    let (client, _transport, _negotiation, mut out_rx, _in_tx) = connected_client("automatic").await?;

    client.append_audio(&[]).await?;
    assert!(out_rx.try_recv().is_err());

    client.append_audio(&[0x01, 0x02, 0x03, 0x04]).await?;
    let frame: Value = serde_json::from_str(&out_rx.recv().await.expect("no append frame"))?;
    assert_eq!(frame["type"], event_types::AUDIO_APPEND);
    assert_eq!(frame["audio"], "AQIDBA==");
    Ok(())
}

#[tokio::test]
async fn explicit_turn_controls_go_out_as_wire_events() -> Result<()> {
    let (client, _transport, _negotiation, mut out_rx, _in_tx) = connected_client("explicit").await?;
    assert!(!client.automatic_turns());

    client.commit().await?;
    client.cancel_response().await?;

    let frame: Value = serde_json::from_str(&out_rx.recv().await.expect("no commit frame"))?;
    assert_eq!(frame["type"], event_types::AUDIO_COMMIT);
    let frame: Value = serde_json::from_str(&out_rx.recv().await.expect("no cancel frame"))?;
    assert_eq!(frame["type"], event_types::RESPONSE_CANCEL);
    Ok(())
}

#[tokio::test]
async fn update_session_merges_the_patch_and_renegotiates() -> Result<()> {
    let (client, _transport, _negotiation, mut out_rx, _in_tx) = connected_client("automatic").await?;

    client
        .update_session(&json!({"turn_detection": "explicit"}))
        .await?;

    let frame: Value = serde_json::from_str(&out_rx.recv().await.expect("no update frame"))?;
    assert_eq!(frame["type"], event_types::SESSION_UPDATE);
    assert_eq!(frame["session"]["turn_detection"], "explicit");
    // Untouched fields survive the merge.
    assert_eq!(frame["session"]["model"], "scribe-1");
    assert!(!client.automatic_turns());
    Ok(())
}

/// Source for streaming-session tests: plays canned frames, then stays
/// open until unsubscribed.
struct FrameSource {
    frames: Vec<Vec<f32>>,
    tx: Option<mpsc::Sender<Vec<f32>>>,
}

#[async_trait::async_trait]
impl AudioSource for FrameSource {
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        let (tx, rx) = mpsc::channel(self.frames.len().max(1));
        for frame in self.frames.drain(..) {
            let _ = tx.send(frame).await;
        }
        self.tx = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&mut self) {
        self.tx.take();
    }
}

#[tokio::test]
async fn streaming_session_routes_audio_out_and_transcripts_in() -> Result<()> {
    let (client, _transport, _negotiation, mut out_rx, in_tx) = connected_client("explicit").await?;
    let pipeline = Pipeline::new(PipelineConfig::default());

    // 100ms of 16kHz audio reaches the encoder's emit threshold in one
    // frame.
    let source = Box::new(FrameSource {
        frames: vec![vec![0.5_f32; 1_600]],
        tx: None,
    });
    let session_id = pipeline
        .registry()
        .start_session(source, "mic", DeliveryMode::Streaming(Arc::clone(&client)))
        .await?;

    let frame: Value = serde_json::from_str(&out_rx.recv().await.expect("no append frame"))?;
    assert_eq!(frame["type"], event_types::AUDIO_APPEND);
    assert!(frame["audio"].as_str().is_some_and(|a| !a.is_empty()));

    // Server-side results land as partial then final entries.
    in_tx.send(Ok(server_frame(
        event_types::TRANSCRIPT_DELTA,
        json!({"text": "hel"}),
    )))?;
    in_tx.send(Ok(server_frame(
        event_types::TRANSCRIPT_COMPLETED,
        json!({"text": "hello"}),
    )))?;

    let store = Arc::clone(pipeline.store());
    wait_until(move || store.len() == 3).await;
    let entries = pipeline.store().entries();
    assert_eq!(entries[1].text, "hel");
    assert_eq!(entries[2].text, "hello");
    assert_eq!(entries[2].session_id, session_id);
    assert_eq!(entries[2].label, "mic");

    // Explicit turn detection: stopping the session commits the turn.
    pipeline.registry().stop_session(&session_id).await?;
    let frame: Value = serde_json::from_str(&out_rx.recv().await.expect("no commit frame"))?;
    assert_eq!(frame["type"], event_types::AUDIO_COMMIT);

    // The session's handlers are gone; late frames change nothing.
    in_tx.send(Ok(server_frame(
        event_types::TRANSCRIPT_COMPLETED,
        json!({"text": "ignored"}),
    )))?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pipeline.store().len(), 4);

    // The partial is superseded by the final in the display view.
    let visible: Vec<String> = pipeline
        .store()
        .display_entries()
        .into_iter()
        .filter(|e| !e.text.is_empty())
        .map(|e| e.text)
        .collect();
    assert_eq!(visible, vec!["hello".to_string()]);
    Ok(())
}

#[tokio::test]
async fn peer_eof_fires_connection_closed_without_error() -> Result<()> {
    let (client, _transport, _negotiation, _out_rx, in_tx) = connected_client("automatic").await?;

    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    let slot = Mutex::new(Some(closed_tx));
    client.once(event_types::CONNECTION_CLOSED, move |event| {
        if let Some(tx) = slot.lock().unwrap().take() {
            let _ = tx.send(event.payload.clone());
        }
    });

    drop(in_tx);

    let payload = tokio::time::timeout(Duration::from_secs(1), closed_rx).await??;
    assert_eq!(payload["error"], false);
    assert_eq!(client.state(), ConnectionState::Closed);
    Ok(())
}

#[tokio::test]
async fn transport_failure_fires_connection_closed_with_error() -> Result<()> {
    let (client, _transport, _negotiation, _out_rx, in_tx) = connected_client("automatic").await?;

    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    let slot = Mutex::new(Some(closed_tx));
    client.once(event_types::CONNECTION_CLOSED, move |event| {
        if let Some(tx) = slot.lock().unwrap().take() {
            let _ = tx.send(event.payload.clone());
        }
    });

    in_tx.send(Err(PipelineError::Transport("reset by peer".to_string())))?;

    let payload = tokio::time::timeout(Duration::from_secs(1), closed_rx).await??;
    assert_eq!(payload["error"], true);
    assert_eq!(client.state(), ConnectionState::Errored);
    Ok(())
}
