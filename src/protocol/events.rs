use chrono::{DateTime, Utc};
use serde_json::Value;

/// Wire event type names.
pub mod event_types {
    /// Client → server: session negotiation / reconfiguration.
    pub const SESSION_UPDATE: &str = "session.update";
    /// Server → client: negotiation acknowledgement.
    pub const SESSION_UPDATED: &str = "session.updated";
    /// Client → server: one base64 PCM chunk.
    pub const AUDIO_APPEND: &str = "input_audio_buffer.append";
    /// Client → server: explicit turn boundary.
    pub const AUDIO_COMMIT: &str = "input_audio_buffer.commit";
    /// Client → server: abandon the in-flight response.
    pub const RESPONSE_CANCEL: &str = "response.cancel";
    /// Server → client: interim transcription text.
    pub const TRANSCRIPT_DELTA: &str = "transcript.delta";
    /// Server → client: completed utterance text.
    pub const TRANSCRIPT_COMPLETED: &str = "transcript.completed";
    /// Server → client: provider-reported error.
    pub const ERROR: &str = "error";
    /// Local only: the connection ended; payload carries `{"error": bool}`.
    pub const CONNECTION_CLOSED: &str = "connection.closed";
}

/// Which side of the connection produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Client,
    Server,
}

/// A typed message flowing in either direction over the streaming
/// connection. Never mutated after dispatch; used only for routing.
#[derive(Debug, Clone)]
pub struct ProtocolEvent {
    pub id: String,
    pub event_type: String,
    pub direction: Direction,
    pub payload: Value,
    pub time: DateTime<Utc>,
}

impl ProtocolEvent {
    pub fn client(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            event_type: event_type.into(),
            direction: Direction::Client,
            payload,
            time: Utc::now(),
        }
    }

    /// Parse an inbound wire frame. Unknown fields stay available through
    /// `payload`; a frame without an `event_id` gets a locally generated id.
    pub fn from_wire(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let event_type = value.get("type")?.as_str()?.to_string();
        let id = value
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("evt_{}", uuid::Uuid::new_v4().simple()));

        Some(Self {
            id,
            event_type,
            direction: Direction::Server,
            payload: value,
            time: Utc::now(),
        })
    }

    /// Serialize for the wire: payload fields flattened alongside
    /// `event_id` and `type`.
    pub fn to_wire(&self) -> String {
        let mut frame = match &self.payload {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };
        frame.insert("event_id".to_string(), Value::String(self.id.clone()));
        frame.insert(
            "type".to_string(),
            Value::String(self.event_type.clone()),
        );
        Value::Object(frame).to_string()
    }

    /// Convenience accessor for a string field of the payload.
    pub fn text_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_keeps_type_and_fields() {
        let event = ProtocolEvent::client(
            event_types::AUDIO_APPEND,
            serde_json::json!({"audio": "AAAA"}),
        );
        let parsed = ProtocolEvent::from_wire(&event.to_wire()).unwrap();
        assert_eq!(parsed.event_type, event_types::AUDIO_APPEND);
        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.text_field("audio"), Some("AAAA"));
    }

    #[test]
    fn frames_without_type_are_rejected() {
        assert!(ProtocolEvent::from_wire(r#"{"event_id": "evt_1"}"#).is_none());
        assert!(ProtocolEvent::from_wire("not json").is_none());
    }
}
