//! Streaming protocol client
//!
//! A persistent duplex connection to a streaming transcription provider:
//! - JSON-framed wire events (`{event_id, type, ...fields}`)
//! - Per-client typed event bus with synchronous fan-out
//! - Connection state machine with session negotiation
//! - Transport trait so the client is testable without a network

pub mod bus;
pub mod client;
pub mod events;
pub mod transport;

pub use bus::{EventBus, HandlerId, CLIENT_EVENT, SERVER_EVENT};
pub use client::{ConnectionState, SessionDescriptor, StreamingClient};
pub use events::{event_types, Direction, ProtocolEvent};
pub use transport::{StreamingTransport, WsTransport};
