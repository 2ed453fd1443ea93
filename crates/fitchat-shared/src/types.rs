//! Chat domain types shared by the store and client crates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat_key::ChatKey;
use crate::error::ModelError;

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Which side of a conversation wrote a message, from the viewer's
/// perspective. Stored as `"self"` / `"counterparty"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sender {
    Local,
    Counterparty,
    /// Any other stored value. Never counted as unread.
    Unknown,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::Local => "self",
            Sender::Counterparty => "counterparty",
            Sender::Unknown => "unknown",
        }
    }
}

impl From<String> for Sender {
    fn from(value: String) -> Self {
        match value.as_str() {
            "self" => Sender::Local,
            "counterparty" => Sender::Counterparty,
            _ => Sender::Unknown,
        }
    }
}

impl From<Sender> for String {
    fn from(sender: Sender) -> Self {
        sender.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// The fields of a message as written under its store key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(default)]
    pub text: String,
    pub sender: Sender,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_by_recipient: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
}

impl MessageRecord {
    /// A freshly composed outgoing message.
    pub fn outgoing(text: impl Into<String>, created_at: i64) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Local,
            created_at,
            read_by_recipient: None,
            read_at: None,
        }
    }
}

/// A single chat message, flattened with its store-assigned id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub read_by_recipient: bool,
    pub read_at: Option<i64>,
}

impl Message {
    /// Parse one child of a `messages` collection.
    ///
    /// Writers are not uniform, so fields are read leniently: a null or
    /// missing `text` is empty, `createdAt`/`readAt` accept any JSON number
    /// (truncated to whole milliseconds) and `readByRecipient` follows
    /// truthiness. Only a non-object entry is rejected.
    pub fn from_entry(id: &str, value: &Value) -> Result<Self, ModelError> {
        let fields = value.as_object().ok_or_else(|| ModelError::MalformedMessage {
            id: id.to_string(),
            reason: format!("expected an object, got {value}"),
        })?;

        let text = match fields.get("text") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let sender = fields
            .get("sender")
            .and_then(Value::as_str)
            .map(|s| Sender::from(s.to_string()))
            .unwrap_or(Sender::Unknown);

        Ok(Self {
            id: id.to_string(),
            text,
            sender,
            created_at: fields.get("createdAt").and_then(epoch_millis).unwrap_or(0),
            read_by_recipient: fields.get("readByRecipient").is_some_and(is_truthy),
            read_at: fields.get("readAt").and_then(epoch_millis),
        })
    }

    /// Sent by the other side and not yet acknowledged by us.
    pub fn is_unread_from_counterparty(&self) -> bool {
        self.sender == Sender::Counterparty && !self.read_by_recipient
    }
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// The signed-in user, as persisted in the session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
}

/// A known counterpart (one of the trainer's clients).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// Display-ready summary of one conversation for a "recent chats" list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DigestEntry {
    pub chat_key: ChatKey,
    pub counterparty_id: String,
    pub counterparty_name: String,
    pub counterparty_avatar: String,
    pub last_message_text: String,
    pub last_message_at: i64,
    pub unread_count: usize,
    pub is_active: bool,
}

/// Any JSON number as whole epoch milliseconds.
fn epoch_millis(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if let Some(n) = value.as_u64() {
        return Some(i64::try_from(n).unwrap_or(i64::MAX));
    }
    value
        .as_f64()
        .filter(|f| f.is_finite())
        .map(|f| f.trunc() as i64)
}

/// Truthiness of a stored flag: `true`, a non-zero number or a non-empty
/// string count as set.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_read_flag_means_unread() {
        let msg = Message::from_entry(
            "a",
            &json!({"text": "hi", "sender": "counterparty", "createdAt": 1000}),
        )
        .unwrap();
        assert!(!msg.read_by_recipient);
        assert!(msg.is_unread_from_counterparty());
    }

    #[test]
    fn test_own_messages_never_unread() {
        let msg = Message::from_entry("b", &json!({"text": "yo", "sender": "self", "createdAt": 5}))
            .unwrap();
        assert_eq!(msg.sender, Sender::Local);
        assert!(!msg.is_unread_from_counterparty());
    }

    #[test]
    fn test_unknown_sender_tolerated() {
        let msg = Message::from_entry("c", &json!({"sender": "bot", "createdAt": 1})).unwrap();
        assert_eq!(msg.sender, Sender::Unknown);
        assert_eq!(msg.text, "");
    }

    #[test]
    fn test_missing_sender_is_unknown() {
        let msg = Message::from_entry("d", &json!({"text": "?"})).unwrap();
        assert_eq!(msg.sender, Sender::Unknown);
        assert_eq!(msg.created_at, 0);
    }

    #[test]
    fn test_non_object_entry_is_malformed() {
        let err = Message::from_entry("d", &json!("just text")).unwrap_err();
        assert!(matches!(err, ModelError::MalformedMessage { .. }));
    }

    #[test]
    fn test_loosely_typed_fields() {
        let null_text = Message::from_entry(
            "a",
            &json!({"text": null, "sender": "counterparty", "createdAt": 1}),
        )
        .unwrap();
        assert_eq!(null_text.text, "");

        let float_time = Message::from_entry(
            "b",
            &json!({"text": "x", "sender": "counterparty", "createdAt": 1000.9, "readAt": 7.5}),
        )
        .unwrap();
        assert_eq!(float_time.created_at, 1000);
        assert_eq!(float_time.read_at, Some(7));

        let zero_flag = Message::from_entry(
            "c",
            &json!({"text": "y", "sender": "counterparty", "createdAt": 2, "readByRecipient": 0}),
        )
        .unwrap();
        assert!(zero_flag.is_unread_from_counterparty());
    }

    #[test]
    fn test_read_flag_truthiness() {
        let read = |flag: Value| {
            Message::from_entry("r", &json!({"sender": "counterparty", "readByRecipient": flag}))
                .unwrap()
                .read_by_recipient
        };
        assert!(read(json!(true)));
        assert!(read(json!(1)));
        assert!(read(json!("yes")));
        assert!(!read(json!(false)));
        assert!(!read(json!(0)));
        assert!(!read(json!(0.0)));
        assert!(!read(json!("")));
        assert!(!read(Value::Null));
    }

    #[test]
    fn test_outgoing_record_wire_shape() {
        let value = serde_json::to_value(MessageRecord::outgoing("hola", 42)).unwrap();
        assert_eq!(value, json!({"text": "hola", "sender": "self", "createdAt": 42}));
    }
}
