//! Inbound frame decoding
//!
//! Every text frame received on the notification socket is decoded exactly
//! once into a [`Payload`]. Decoding never fails: text that is not valid
//! JSON is delivered unchanged as [`Payload::Raw`].
//!
//! ## Frame shape
//!
//! ```json
//! {"event": "documents.processing", "id": "d1", "name": "report.pdf", "progressPercentage": 40}
//! {"event": "chat.response", "requestId": "req_1", "token": "Hel"}
//! {"event": "chat.response", "requestId": "req_1", "token": "", "sources": [{"id": "d1", "name": "report.pdf", "page": "3"}]}
//! {"event": "chat.response", "requestId": "req_1", "complete": true}
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The frame parsed as JSON
    Structured(Value),
    /// The frame was not JSON; original text preserved
    Raw(String),
}

impl Payload {
    /// Decode frame text, falling back to the raw string
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Payload::Structured(value),
            Err(_) => Payload::Raw(text.to_string()),
        }
    }

    /// The `event` discriminator, if the payload is an object carrying one
    pub fn discriminator(&self) -> Option<&str> {
        match self {
            Payload::Structured(Value::Object(map)) => map.get("event").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Interpret the payload as an [`InboundEvent`]
    ///
    /// Returns `None` for raw text and for JSON values that are not objects.
    pub fn as_event(&self) -> Option<InboundEvent> {
        match self {
            Payload::Structured(value @ Value::Object(_)) => {
                InboundEvent::deserialize(value).ok()
            }
            _ => None,
        }
    }

    /// Text shown to a user when the payload is surfaced as a notification
    ///
    /// Strings are shown as-is; any other value is shown as compact JSON.
    pub fn display_text(&self) -> String {
        match self {
            Payload::Raw(text) => text.clone(),
            Payload::Structured(Value::String(text)) => text.clone(),
            Payload::Structured(value) => value.to_string(),
        }
    }
}

/// A source document referenced by a streamed answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Document identifier
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    /// Document file name
    #[serde(default)]
    pub name: String,
    /// Page the passage was taken from
    #[serde(
        default,
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub page: Option<String>,
}

/// Structured view over an inbound frame
///
/// All fields are optional; which ones are present depends on the event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    /// Discriminator naming the event
    #[serde(default)]
    pub event: Option<String>,
    /// Identifier of the document an event refers to
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,
    /// Document name
    #[serde(default)]
    pub name: Option<String>,
    /// Document status
    #[serde(default)]
    pub status: Option<String>,
    /// Processing progress (0–100)
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub progress_percentage: Option<f64>,
    /// Server-side error message
    #[serde(default)]
    pub error: Option<String>,
    /// Request identifier of a streamed chat answer
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub request_id: Option<String>,
    /// Next token of a streamed chat answer
    #[serde(default)]
    pub token: Option<String>,
    /// Set on the terminal frame of a streamed answer
    #[serde(default)]
    pub complete: Option<bool>,
    /// Sources of the answer, once known
    #[serde(default)]
    pub sources: Option<Vec<Source>>,
}

/// Deserializers tolerating values sent as either strings or numbers
mod lenient {
    use super::*;

    pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "expected string or number, got {other}"
            ))),
        }
    }

    pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(serde::de::Error::custom(format!(
                "expected string or number, got {other}"
            ))),
        }
    }

    pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => Ok(s.trim().parse::<f64>().ok()),
            Some(other) => Err(serde::de::Error::custom(format!(
                "expected number, got {other}"
            ))),
        }
    }
}
