//! Store path layout.
//!
//! ```text
//! {root}/{chat_key}/messages/{message_id}/{field}
//! ```

use crate::chat_key::ChatKey;
use crate::constants::MESSAGES_SEGMENT;

pub fn messages_path(root: &str, key: &ChatKey) -> String {
    format!("{}/{}/{}", root.trim_end_matches('/'), key, MESSAGES_SEGMENT)
}

pub fn message_field_path(root: &str, key: &ChatKey, message_id: &str, field: &str) -> String {
    format!("{}/{}/{}", messages_path(root, key), message_id, field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let key = ChatKey::from_stored("carlos_lopez");
        assert_eq!(messages_path("conversations/", &key), "conversations/carlos_lopez/messages");
        assert_eq!(
            message_field_path("conversations", &key, "m1", "readAt"),
            "conversations/carlos_lopez/messages/m1/readAt"
        );
    }
}
