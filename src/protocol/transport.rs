use futures::sink::SinkExt;
use futures::stream::{SplitSink, SplitStream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::info;

use crate::error::PipelineError;

/// A duplex, JSON-framed byte-stream connection.
///
/// The client only needs text frames in both directions; splitting send and
/// receive behind `&self` lets the writer run while an inbound frame is
/// being handled.
#[async_trait::async_trait]
pub trait StreamingTransport: Send + Sync {
    async fn send(&self, frame: String) -> Result<(), PipelineError>;

    /// Next inbound text frame. `None` means the peer closed cleanly;
    /// `Some(Err(_))` means the transport failed.
    async fn next_frame(&self) -> Option<Result<String, PipelineError>>;

    async fn close(&self);
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, tungstenite::Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// WebSocket transport over tokio-tungstenite.
pub struct WsTransport {
    sink: Mutex<WsSink>,
    stream: Mutex<WsStream>,
}

impl WsTransport {
    /// Open a WebSocket connection with bearer-token auth.
    pub async fn connect(url: &str, api_key: &str) -> Result<Self, PipelineError> {
        info!("Opening streaming transport to {}", url);

        let uri: tungstenite::http::Uri = url
            .parse()
            .map_err(|e| PipelineError::Transport(format!("invalid url: {}", e)))?;
        let host = uri
            .host()
            .ok_or_else(|| PipelineError::Transport(format!("url has no host: {}", url)))?
            .to_string();

        let request = tungstenite::http::Request::builder()
            .uri(uri)
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Authorization", format!("Bearer {}", api_key))
            .body(())
            .map_err(|e| PipelineError::Transport(format!("failed to build request: {}", e)))?;

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        info!("Streaming transport connected");

        let (sink, stream) = ws_stream.split();
        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

#[async_trait::async_trait]
impl StreamingTransport for WsTransport {
    async fn send(&self, frame: String) -> Result<(), PipelineError> {
        let mut sink = self.sink.lock().await;
        sink.send(tungstenite::Message::Text(frame))
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))
    }

    async fn next_frame(&self) -> Option<Result<String, PipelineError>> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await? {
                Ok(tungstenite::Message::Text(text)) => return Some(Ok(text)),
                Ok(tungstenite::Message::Close(_)) => return None,
                // Binary, ping and pong frames carry no protocol events.
                Ok(_) => continue,
                Err(e) => return Some(Err(PipelineError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}
