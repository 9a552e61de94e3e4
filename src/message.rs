use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// A broadcast event: a transient, fire-and-forget `{type, data}` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl ChannelEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// Wire messages exchanged between sessions on a channel.
///
/// `EVENT` nests its payload under `data`; the inner pair is what
/// listeners receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "SET_VALUE")]
    SetValue { key: String, value: Value },
    #[serde(rename = "EVENT")]
    Event { data: ChannelEvent },
}

impl Message {
    pub fn set_value(key: impl Into<String>, value: Value) -> Self {
        Message::SetValue {
            key: key.into(),
            value,
        }
    }

    pub fn event(event_type: impl Into<String>, data: Value) -> Self {
        Message::Event {
            data: ChannelEvent::new(event_type, data),
        }
    }

    /// Decode a transport frame. An unrecognized `type` tag or a missing
    /// field is a `MalformedMessage`; the caller logs and drops it.
    pub fn decode(frame: Value) -> Result<Self, RelayError> {
        serde_json::from_value(frame).map_err(|err| RelayError::MalformedMessage(err.to_string()))
    }

    pub fn encode(&self) -> Value {
        // Serialization of these shapes cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_value_wire_shape() {
        let encoded = Message::set_value("score", json!("10")).encode();
        assert_eq!(
            encoded,
            json!({"type": "SET_VALUE", "key": "score", "value": "10"})
        );
    }

    #[test]
    fn event_wire_shape_nests_payload() {
        let encoded = Message::event("ping", json!("now")).encode();
        assert_eq!(
            encoded,
            json!({"type": "EVENT", "data": {"type": "ping", "data": "now"}})
        );
    }

    #[test]
    fn decode_roundtrip() {
        let msg = Message::event("hello", json!({"n": 1}));
        assert_eq!(Message::decode(msg.encode()).unwrap(), msg);
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let err = Message::decode(json!({"type": "NONSENSE", "key": "x"})).unwrap_err();
        assert!(matches!(err, RelayError::MalformedMessage(_)));
    }

    #[test]
    fn missing_field_is_malformed() {
        let err = Message::decode(json!({"type": "SET_VALUE", "value": 1})).unwrap_err();
        assert!(matches!(err, RelayError::MalformedMessage(_)));
    }
}
