//! Gateway wire frames.
//!
//! Every message exchanged over the persistent connection is one JSON
//! object carrying a `type` tag. Decoding classifies by that tag and fails
//! closed: a recognized tag with a bad shape is an error, an unrecognized
//! tag becomes [`Frame::Unknown`] so new gateway frame kinds are dropped at
//! the classification step instead of deep in business logic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound request frame (tag `req`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation ID, unique within the connection's lifetime.
    pub id: String,
    /// Remote method name (e.g. `chat.send`).
    pub method: String,
    /// Parameters object.
    #[serde(default)]
    pub params: Value,
}

/// Inbound response frame (tag `res`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Echoed correlation ID.
    pub id: String,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Result payload (present when `ok == true`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error payload (present when `ok == false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Inbound named event frame (tag `event`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name (e.g. `run.started`).
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub payload: Value,
}

/// Inbound push frame (tag `push`); `payload.type` discriminates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushFrame {
    /// Push payload, carrying its own `type` field.
    pub payload: Value,
}

impl PushFrame {
    /// The `type` discriminant inside the payload, if present.
    pub fn push_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }
}

/// One decoded message from the gateway connection.
#[derive(Clone, Debug)]
pub enum Frame {
    /// Request (only ever sent, but tolerated inbound).
    Request(RequestFrame),
    /// Response to an outstanding call.
    Response(ResponseFrame),
    /// Named event.
    Event(EventFrame),
    /// Typed push.
    Push(PushFrame),
    /// Valid JSON with a missing or unrecognized `type` tag.
    Unknown(Value),
}

/// Frame decoding failure.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The text is not valid JSON at all.
    #[error("frame is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),

    /// The tag was recognized but required fields are missing or mistyped.
    #[error("malformed `{tag}` frame: {source}")]
    Fields {
        /// The recognized `type` tag.
        tag: String,
        /// Underlying field error.
        #[source]
        source: serde_json::Error,
    },
}

impl Frame {
    /// Decode one wire message.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::Syntax)?;
        let tag = match value.get("type").and_then(Value::as_str) {
            Some(tag) => tag.to_owned(),
            None => return Ok(Self::Unknown(value)),
        };

        let fields = |source| FrameError::Fields {
            tag: tag.clone(),
            source,
        };
        match tag.as_str() {
            "req" => serde_json::from_value(value)
                .map(Self::Request)
                .map_err(fields),
            "res" => serde_json::from_value(value)
                .map(Self::Response)
                .map_err(fields),
            "event" => serde_json::from_value(value)
                .map(Self::Event)
                .map_err(fields),
            "push" => serde_json::from_value(value)
                .map(Self::Push)
                .map_err(fields),
            _ => Ok(Self::Unknown(value)),
        }
    }

    /// Short discriminant name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "req",
            Self::Response(_) => "res",
            Self::Event(_) => "event",
            Self::Push(_) => "push",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl RequestFrame {
    /// Build a request frame.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Serialize to the wire format, including the `type` tag.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(ref mut map) = value {
            let _ = map.insert("type".to_owned(), Value::from("req"));
        }
        serde_json::to_string(&value)
    }
}
