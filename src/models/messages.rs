use serde::{Deserialize, Serialize};
use crate::models::{CodecError, EditNotification, EditTimestamp, PointerPosition, PresenceUser};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PresenceMessage {
    pub viewers: Vec<PresenceUser>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CursorMessage {
    pub user_id: String,
    pub position: PointerPosition,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SelectionMessage {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub entity_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EditMessage {
    pub user_id: String,
    pub username: String,
    pub entity: String,
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: EditTimestamp,
}

impl From<EditMessage> for EditNotification {
    fn from(msg: EditMessage) -> Self {
        EditNotification {
            user_id: msg.user_id,
            username: msg.username,
            entity: msg.entity,
            action: msg.action,
            data: msg.data,
            timestamp: msg.timestamp,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub message: String,
}

/// Envelopes pushed by the collaboration server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "presence")]
    Presence(PresenceMessage),
    #[serde(rename = "cursor")]
    Cursor(CursorMessage),
    #[serde(rename = "selection")]
    Selection(SelectionMessage),
    #[serde(rename = "edit")]
    Edit(EditMessage),
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error(ErrorMessage),
    #[serde(other)]
    Unknown,
}

/// Whether an outbound envelope survives a disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Sent only while open, dropped otherwise
    Ephemeral,
    /// Queued while disconnected and flushed in order after the next open
    Durable,
}

/// Envelopes sent by this client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "cursor")]
    Cursor { position: PointerPosition },
    #[serde(rename = "selection")]
    Selection { entity_id: Option<String> },
    #[serde(rename = "edit")]
    Edit {
        entity: String,
        action: String,
        data: serde_json::Value,
    },
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },
}

impl SendMessage {
    pub fn class(&self) -> MessageClass {
        match self {
            SendMessage::Cursor { .. } | SendMessage::Ping { .. } => MessageClass::Ephemeral,
            SendMessage::Selection { .. } | SendMessage::Edit { .. } => MessageClass::Durable,
        }
    }

    /// Liveness ping stamped with the current time in epoch millis
    pub fn ping_now() -> Self {
        SendMessage::Ping { timestamp: chrono::Utc::now().timestamp_millis() }
    }
}

/// Decode one inbound text frame.
///
/// Anything that is not a JSON object with a string `type` is rejected; an
/// unrecognised `type` decodes to [`ReceivedMessage::Unknown`].
pub fn decode(text: &str) -> Result<ReceivedMessage, CodecError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    match value.get("type") {
        Some(serde_json::Value::String(_)) => Ok(serde_json::from_value(value)?),
        _ => Err(CodecError::MissingType),
    }
}

pub fn encode(msg: &SendMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(msg)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_presence_snapshot() {
        let msg = decode(r#"{"type":"presence","viewers":[{"user_id":"u1","username":"alice"}]}"#).unwrap();
        let ReceivedMessage::Presence(presence) = msg else { panic!("expected presence") };
        assert_eq!(presence.viewers.len(), 1);
        assert_eq!(presence.viewers[0].username, "alice");
        assert_eq!(presence.viewers[0].display_name, None);
    }

    #[test]
    fn selection_without_entity_is_null() {
        let msg = decode(r#"{"type":"selection","user_id":"u1","username":"alice"}"#).unwrap();
        assert_eq!(
            msg,
            ReceivedMessage::Selection(SelectionMessage {
                user_id: "u1".into(),
                username: "alice".into(),
                entity_id: None,
            })
        );
    }

    #[test]
    fn edit_timestamp_accepts_millis_and_strings() {
        let millis = decode(r#"{"type":"edit","user_id":"u1","username":"a","entity":"zone","action":"update","data":{"id":3},"timestamp":1700000000000}"#).unwrap();
        let ReceivedMessage::Edit(edit) = millis else { panic!("expected edit") };
        assert_eq!(edit.timestamp, EditTimestamp::Millis(1_700_000_000_000));
        assert_eq!(edit.data, json!({"id": 3}));

        let text = decode(r#"{"type":"edit","user_id":"u1","username":"a","entity":"zone","action":"delete","timestamp":"2024-01-01T00:00:00Z"}"#).unwrap();
        let ReceivedMessage::Edit(edit) = text else { panic!("expected edit") };
        assert_eq!(edit.timestamp, EditTimestamp::Text("2024-01-01T00:00:00Z".into()));
        assert_eq!(edit.data, serde_json::Value::Null);
    }

    #[test]
    fn pong_and_unknown_types() {
        assert_eq!(decode(r#"{"type":"pong"}"#).unwrap(), ReceivedMessage::Pong);
        assert_eq!(decode(r#"{"type":"typing","user_id":"u1"}"#).unwrap(), ReceivedMessage::Unknown);
    }

    #[test]
    fn malformed_frames_are_errors_not_panics() {
        for frame in [
            "not json",
            "[1,2,3]",
            "42",
            r#"{"viewers":[]}"#,
            r#"{"type":7}"#,
            r#"{"type":"presence","viewers":"nobody"}"#,
            r#"{"type":"cursor","user_id":"u1","position":{"x":"left"}}"#,
        ] {
            assert!(decode(frame).is_err(), "expected {frame} to be rejected");
        }
    }

    #[test]
    fn outbound_wire_shapes() {
        let selection = encode(&SendMessage::Selection { entity_id: None }).unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&selection).unwrap(), json!({"type": "selection", "entity_id": null}));

        let cursor = encode(&SendMessage::Cursor { position: PointerPosition { x: 1.5, y: 2.0 } }).unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&cursor).unwrap(), json!({"type": "cursor", "position": {"x": 1.5, "y": 2.0}}));

        let edit = encode(&SendMessage::Edit { entity: "zone".into(), action: "create".into(), data: json!({"id": 1}) }).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&edit).unwrap(),
            json!({"type": "edit", "entity": "zone", "action": "create", "data": {"id": 1}})
        );
    }

    #[test]
    fn message_classes() {
        assert_eq!(SendMessage::ping_now().class(), MessageClass::Ephemeral);
        assert_eq!(SendMessage::Cursor { position: PointerPosition { x: 0.0, y: 0.0 } }.class(), MessageClass::Ephemeral);
        assert_eq!(SendMessage::Selection { entity_id: Some("z".into()) }.class(), MessageClass::Durable);
        assert_eq!(
            SendMessage::Edit { entity: "e".into(), action: "update".into(), data: serde_json::Value::Null }.class(),
            MessageClass::Durable
        );
    }
}
