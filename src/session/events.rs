use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

const TYPE_FIELD: &str = "type";
const ID_FIELD: &str = "event_id";
const TIMESTAMP_FIELD: &str = "timestamp";

/// A realtime API event as exchanged over the `oai-events` channel.
///
/// The payload is kept as a JSON object so that provider event types we do
/// not model are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

/// Why an inbound frame could not be turned into an [`Event`]
#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

impl Event {
    /// Build an event of the given type with no other fields
    pub fn new(kind: &str) -> Self {
        let mut map = Map::new();
        map.insert(TYPE_FIELD.to_string(), Value::String(kind.to_string()));
        Self(map)
    }

    /// Wrap an arbitrary JSON value; only objects are events
    pub fn from_value(value: Value) -> Result<Self, EventParseError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Array(_) => Err(EventParseError::NotAnObject("array")),
            Value::String(_) => Err(EventParseError::NotAnObject("string")),
            Value::Number(_) => Err(EventParseError::NotAnObject("number")),
            Value::Bool(_) => Err(EventParseError::NotAnObject("bool")),
            Value::Null => Err(EventParseError::NotAnObject("null")),
        }
    }

    /// Parse a text frame received on the event channel
    pub fn parse(text: &str) -> Result<Self, EventParseError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// `conversation.item.create` carrying a user text message
    pub fn user_message(text: &str) -> Self {
        Self::from_map(json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "user",
                "content": [
                    {
                        "type": "input_text",
                        "text": text,
                    }
                ],
            },
        }))
    }

    /// `response.create`, asking the model to respond
    pub fn response_create() -> Self {
        Self::new("response.create")
    }

    fn from_map(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self(Map::new()),
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.0.get(TYPE_FIELD).and_then(Value::as_str)
    }

    pub fn event_id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.0.get(TIMESTAMP_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Assign a client-generated id if the event has none
    pub fn ensure_event_id(&mut self) -> &str {
        let missing = !matches!(self.0.get(ID_FIELD), Some(Value::String(s)) if !s.is_empty());
        if missing {
            self.0.insert(
                ID_FIELD.to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }
        self.event_id().unwrap_or_default()
    }

    /// Backfill the local display timestamp if the event has none
    pub fn ensure_timestamp(&mut self) {
        if self.timestamp().is_none() {
            self.0.insert(
                TIMESTAMP_FIELD.to_string(),
                Value::String(display_timestamp()),
            );
        }
    }

    /// Serialized form sent over the channel. Never includes `timestamp`.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        if self.0.contains_key(TIMESTAMP_FIELD) {
            let mut map = self.0.clone();
            map.remove(TIMESTAMP_FIELD);
            serde_json::to_string(&map)
        } else {
            serde_json::to_string(&self.0)
        }
    }

    pub fn as_json(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Transcript or text carried by a completed response event, if any
    pub fn transcript(&self) -> Option<&str> {
        match self.kind()? {
            "response.audio_transcript.done" => self.0.get("transcript").and_then(Value::as_str),
            "response.text.done" => self.0.get("text").and_then(Value::as_str),
            "conversation.item.input_audio_transcription.completed" => {
                self.0.get("transcript").and_then(Value::as_str)
            }
            _ => None,
        }
    }
}

fn display_timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
