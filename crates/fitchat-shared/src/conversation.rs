//! Pure views over conversation snapshots.
//!
//! Both the per-conversation subscription and the cross-conversation
//! aggregator receive raw JSON snapshots from the store. The helpers here
//! turn them into ordered [`Message`] lists and unread statistics.

use serde_json::Value;
use tracing::warn;

use crate::chat_key::ChatKey;
use crate::constants::MESSAGES_SEGMENT;
use crate::types::Message;

/// Flatten a `messages` snapshot into a list ordered by `createdAt`.
///
/// Ties are broken by message id. Entries that fail to parse are skipped.
pub fn messages_from_snapshot(snapshot: Option<&Value>) -> Vec<Message> {
    let Some(Value::Object(children)) = snapshot else {
        return Vec::new();
    };

    let mut messages: Vec<Message> = children
        .iter()
        .filter_map(|(id, value)| match Message::from_entry(id, value) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(error = %e, "Skipping malformed message");
                None
            }
        })
        .collect();

    sort_messages(&mut messages);
    messages
}

pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Ids of counterpart messages we have not acknowledged yet.
pub fn unread_ids(messages: &[Message]) -> Vec<&str> {
    messages
        .iter()
        .filter(|m| m.is_unread_from_counterparty())
        .map(|m| m.id.as_str())
        .collect()
}

pub fn unread_count(messages: &[Message]) -> usize {
    messages.iter().filter(|m| m.is_unread_from_counterparty()).count()
}

/// Computed state of one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub chat_key: ChatKey,
    pub last_message: Message,
    pub unread_count: usize,
    /// Newest unread message from the counterpart, if any.
    pub latest_unread: Option<Message>,
}

impl ConversationSummary {
    /// Summarise an ordered message list. Returns `None` when empty.
    pub fn from_messages(chat_key: ChatKey, messages: &[Message]) -> Option<Self> {
        let last_message = messages.iter().max_by_key(|m| m.created_at)?.clone();
        let latest_unread = messages
            .iter()
            .filter(|m| m.is_unread_from_counterparty())
            .max_by_key(|m| m.created_at)
            .cloned();

        Some(Self {
            chat_key,
            last_message,
            unread_count: unread_count(messages),
            latest_unread,
        })
    }
}

/// Split a snapshot of the conversations root into per-key message lists.
pub fn conversations_from_root(snapshot: Option<&Value>) -> Vec<(ChatKey, Vec<Message>)> {
    let Some(Value::Object(conversations)) = snapshot else {
        return Vec::new();
    };

    conversations
        .iter()
        .map(|(key, node)| {
            let messages = messages_from_snapshot(node.get(MESSAGES_SEGMENT));
            (ChatKey::from_stored(key.clone()), messages)
        })
        .collect()
}
