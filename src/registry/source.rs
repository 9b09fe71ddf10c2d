use anyhow::Result;
use tokio::sync::mpsc;

/// Opaque audio capture capability obtained from the host environment.
///
/// The registry does not know how audio is produced (tab capture,
/// microphone, a file for tests); it only requires a continuous stream of
/// float samples that ends once `unsubscribe` is called.
#[async_trait::async_trait]
pub trait AudioSource: Send {
    /// Begin producing samples. The receiver yields until the source is
    /// unsubscribed or exhausted.
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<f32>>>;

    /// Stop producing samples and close the stream. Idempotent.
    async fn unsubscribe(&mut self);
}
