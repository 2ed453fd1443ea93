//! Collaborators shared by every chat component.

use std::sync::Arc;

use fitchat_store::{ConversationStore, SessionStore};

use crate::config::ClientConfig;

/// Handles to the realtime store and the session, plus the store root.
///
/// Components never share state through the context; each opens its own
/// subscriptions.
#[derive(Clone)]
pub struct ChatContext {
    pub store: Arc<dyn ConversationStore>,
    pub session: Arc<dyn SessionStore>,
    pub conversations_root: String,
}

impl ChatContext {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        session: Arc<dyn SessionStore>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            store,
            session,
            conversations_root: config.conversations_root.clone(),
        }
    }
}
