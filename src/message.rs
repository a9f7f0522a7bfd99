// Copyright (c) 2025, The AMQP Relay Authors
// MIT License
// All rights reserved.

//! # Message Wire Format
//!
//! The JSON envelope exchanged over the relay. An `Event` is immutable
//! once built: the broker and the consumer only read it, or re-wrap its
//! bytes untouched when forwarding to quarantine or back to the main
//! path.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type attached to every published message
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Header carrying the fixed-point wire schema marker
pub const SCHEMA_VERSION_HEADER: &str = "schemaVersion";

/// Current wire schema version
pub const SCHEMA_VERSION: i32 = 1;

/// The message envelope: `{messageId, type, version, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub message_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: i32,
    pub payload: serde_json::Value,
}

impl Event {
    /// Creates a new event with a generated id and the current schema
    /// version.
    pub fn new(kind: &str, payload: serde_json::Value) -> Event {
        Event {
            message_id: Uuid::new_v4().to_string(),
            kind: kind.to_owned(),
            version: SCHEMA_VERSION,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_wire_field_names() {
        let evt = Event {
            message_id: "msg-1".to_owned(),
            kind: "demo".to_owned(),
            version: 1,
            payload: json!({"n": 7}),
        };

        let value = serde_json::to_value(&evt).unwrap();
        assert_eq!(
            value,
            json!({"messageId": "msg-1", "type": "demo", "version": 1, "payload": {"n": 7}})
        );
    }

    #[test]
    fn decodes_arbitrary_payload_shapes() {
        let body = r#"{"messageId":"m","type":"demo","version":1,"payload":[1,"two",null]}"#;
        let evt: Event = serde_json::from_str(body).unwrap();
        assert_eq!(evt.message_id, "m");
        assert_eq!(evt.payload, json!([1, "two", null]));
    }

    #[test]
    fn new_assigns_unique_ids() {
        let a = Event::new("demo", json!({}));
        let b = Event::new("demo", json!({}));
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.version, SCHEMA_VERSION);
    }
}
