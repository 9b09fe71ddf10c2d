pub mod config;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod status;
pub mod transcript;

pub use config::PipelineConfig;
pub use dispatch::{
    deliver_segment, dispatch, BatchProvider, DeliveryContext, DispatchOutcome, ErrorClass,
    ProviderError, RetryPolicy, StatusClassifier,
};
pub use encoder::{ContinuousEncoder, Segment, Segmenter};
pub use error::PipelineError;
pub use pipeline::Pipeline;
pub use protocol::{
    event_types, ConnectionState, Direction, EventBus, HandlerId, ProtocolEvent,
    SessionDescriptor, StreamingClient, StreamingTransport, WsTransport, CLIENT_EVENT,
    SERVER_EVENT,
};
pub use queue::{PendingItem, PendingQueue};
pub use registry::{AudioSource, CaptureRegistry, CaptureSession, DeliveryMode};
pub use status::{DeliveryStatus, StatusEvent};
pub use transcript::{
    summarize_once, EntryKind, SummaryCursor, Summarizer, TranscriptEntry, TranscriptStore,
};
