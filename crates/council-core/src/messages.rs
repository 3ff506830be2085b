use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::PayloadError;
use crate::ids::{ConversationId, MessageId};
use crate::timestamp;

/// Payload keys the actor name may arrive under, most specific first.
const ACTOR_KEYS: &[&str] = &["agent_name", "actor_name", "actorName", "from"];

/// One conversation message as delivered on the stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub timestamp: String,
    #[serde(rename = "agent_name")]
    pub actor_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Fields the monitor does not interpret, kept as received.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        timestamp: impl Into<String>,
        actor_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::from_raw(id),
            timestamp: timestamp.into(),
            actor_name: actor_name.into(),
            content: content.into(),
            role: None,
            conversation_id: None,
            metadata: None,
            extra: Map::new(),
        }
    }

    /// Decode a raw stream frame.
    ///
    /// The actor comes from the first actor key present; the other
    /// actor keys stay in `extra`. A frame without an `id` gets the id the
    /// backend would have derived for it.
    pub fn from_payload(raw: &str) -> Result<Self, PayloadError> {
        let mut value: Value = serde_json::from_str(raw)?;
        let obj = value.as_object_mut().ok_or(PayloadError::NotAnObject)?;

        let actor = ACTOR_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::to_owned);
        if let Some(actor) = &actor {
            obj.insert(ACTOR_KEYS[0].into(), Value::String(actor.clone()));
        }

        if !obj.contains_key("id") {
            let text = |key: &str| obj.get(key).and_then(Value::as_str).unwrap_or_default();
            let id = MessageId::derive(
                text("content"),
                text("timestamp"),
                actor.as_deref().unwrap_or_default(),
            );
            obj.insert("id".into(), Value::String(id.as_str().to_owned()));
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Microsecond sort key, `None` when the timestamp is unparseable.
    pub fn sort_key(&self) -> Option<i64> {
        timestamp::sort_key(&self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_backend_shape() {
        let raw = json!({
            "id": "a1b2c3d4e5f60718",
            "conversation_id": "0f0e0d0c0b0a0908",
            "agent_name": "HighPriest",
            "timestamp": "2024-05-01T12:00:00.123456+00:00",
            "role": "assistant",
            "content": "The council convenes.",
            "metadata": {"mood": "solemn"}
        })
        .to_string();

        let msg = Message::from_payload(&raw).unwrap();
        assert_eq!(msg.id.as_str(), "a1b2c3d4e5f60718");
        assert_eq!(msg.actor_name, "HighPriest");
        assert_eq!(msg.role.as_deref(), Some("assistant"));
        assert_eq!(
            msg.conversation_id,
            Some(ConversationId::from_raw("0f0e0d0c0b0a0908"))
        );
        assert_eq!(msg.metadata, Some(json!({"mood": "solemn"})));
        assert!(msg.extra.is_empty());
        assert!(msg.sort_key().is_some());
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let raw = r#"{"id":"x","agent_name":"A","timestamp":"t","content":"c","topic":"gov/events","status":"sent"}"#;
        let msg = Message::from_payload(raw).unwrap();
        assert_eq!(msg.extra.get("topic"), Some(&json!("gov/events")));
        assert_eq!(msg.extra.get("status"), Some(&json!("sent")));
    }

    #[test]
    fn actor_aliases_are_accepted() {
        let raw = r#"{"id":"x","from":"TreasuryAgent","timestamp":"t","content":"c"}"#;
        assert_eq!(Message::from_payload(raw).unwrap().actor_name, "TreasuryAgent");

        let raw = r#"{"id":"y","actorName":"PresidentAgent","timestamp":"t","content":"c"}"#;
        assert_eq!(Message::from_payload(raw).unwrap().actor_name, "PresidentAgent");
    }

    #[test]
    fn agent_name_wins_over_other_actor_keys() {
        let raw = json!({
            "id": "x",
            "agent_name": "PresidentAgent",
            "from": "System",
            "to": "All Agents",
            "topic": "government/events/world",
            "timestamp": "t",
            "content": "c"
        })
        .to_string();

        let msg = Message::from_payload(&raw).unwrap();
        assert_eq!(msg.actor_name, "PresidentAgent");
        assert_eq!(msg.extra.get("from"), Some(&json!("System")));
        assert_eq!(msg.extra.get("to"), Some(&json!("All Agents")));
    }

    #[test]
    fn first_present_actor_key_is_used() {
        let raw = r#"{"id":"x","actorName":"Treasury","from":"User","timestamp":"t","content":"c"}"#;
        let msg = Message::from_payload(raw).unwrap();
        assert_eq!(msg.actor_name, "Treasury");
        assert_eq!(msg.extra.get("actorName"), Some(&json!("Treasury")));
        assert_eq!(msg.extra.get("from"), Some(&json!("User")));
    }

    #[test]
    fn missing_id_is_derived() {
        let raw = r#"{"agent_name":"HighPriest","timestamp":"2024-01-01T00:00:00+00:00","content":"hi"}"#;
        let msg = Message::from_payload(raw).unwrap();
        assert_eq!(
            msg.id,
            MessageId::derive("hi", "2024-01-01T00:00:00+00:00", "HighPriest")
        );
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(matches!(
            Message::from_payload("{not json"),
            Err(PayloadError::Malformed(_))
        ));
        assert!(matches!(
            Message::from_payload("[1,2,3]"),
            Err(PayloadError::NotAnObject)
        ));
        // Subscription acknowledgements carry no actor and are not messages.
        assert!(Message::from_payload(r#"{"message":"Subscribed"}"#).is_err());
    }

    #[test]
    fn unparseable_timestamp_still_decodes() {
        let raw = r#"{"id":"x","agent_name":"A","timestamp":"3:04:05 PM","content":"c"}"#;
        let msg = Message::from_payload(raw).unwrap();
        assert_eq!(msg.sort_key(), None);
    }

    #[test]
    fn serializes_with_wire_names() {
        let msg = Message::new("id1", "2024-01-01T00:00:00Z", "Whispers", "psst");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["agent_name"], "Whispers");
        assert!(value.get("role").is_none());
    }
}
