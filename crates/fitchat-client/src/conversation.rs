//! Live view of a single conversation.
//!
//! [`ConversationSubscription`] attaches to `{root}/{chat_key}/messages`,
//! republishes the ordered message list on every store event and marks
//! counterpart messages as read in the background. Each instance owns at
//! most one store subscription; it is released on unmount, on re-key and
//! on drop.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fitchat_shared::chat_key::ChatKey;
use fitchat_shared::constants::{CONNECTION_ERROR_MESSAGE, FIELD_READ_AT, FIELD_READ_BY_RECIPIENT};
use fitchat_shared::conversation::{messages_from_snapshot, unread_ids};
use fitchat_shared::paths::{message_field_path, messages_path};
use fitchat_shared::types::{Message, MessageRecord};
use fitchat_store::{ConversationStore, StoreEvent};

use crate::context::ChatContext;
use crate::error::ClientError;
use crate::now_millis;

/// Lifecycle of a live subscription.
///
/// `Synced` is re-entered on every store event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Subscribing,
    Synced,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    pub chat_key: ChatKey,
    pub status: SyncStatus,
    /// Ascending by `createdAt`, then id.
    pub messages: Vec<Message>,
    /// User-facing error, set only while `Errored`.
    pub error: Option<String>,
}

/// Result of [`ConversationSubscription::send`].
///
/// Sending is fire-and-forget: the draft is cleared as soon as the
/// preconditions pass, whatever the store does with the append. There is
/// no retry and no local echo; the message shows up when the subscription
/// delivers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Stored under the returned key.
    Appended(String),
    /// Draft was empty or whitespace. Nothing was sent.
    EmptyText,
    /// No signed-in user. Nothing was sent.
    NoIdentity,
    /// The store rejected the append. The draft was still cleared.
    Failed,
}

pub struct ConversationSubscription {
    ctx: ChatContext,
    chat_key: ChatKey,
    view_tx: watch::Sender<ConversationView>,
    task: Option<JoinHandle<()>>,
}

impl ConversationSubscription {
    /// Create an idle subscription for a raw navigation parameter.
    pub fn new(ctx: ChatContext, raw_param: Option<&str>) -> Self {
        let chat_key = ChatKey::derive(raw_param);
        let (view_tx, _rx) = watch::channel(ConversationView {
            chat_key: chat_key.clone(),
            status: SyncStatus::Idle,
            messages: Vec::new(),
            error: None,
        });

        Self {
            ctx,
            chat_key,
            view_tx,
            task: None,
        }
    }

    pub fn chat_key(&self) -> &ChatKey {
        &self.chat_key
    }

    pub fn is_mounted(&self) -> bool {
        self.task.is_some()
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> ConversationView {
        self.view_tx.borrow().clone()
    }

    /// Receiver that observes every published view.
    pub fn watch(&self) -> watch::Receiver<ConversationView> {
        self.view_tx.subscribe()
    }

    /// Start listening. Re-mounting an already mounted subscription
    /// restarts it.
    pub async fn mount(&mut self) {
        self.release().await;

        self.view_tx.send_modify(|view| {
            view.chat_key = self.chat_key.clone();
            view.status = SyncStatus::Subscribing;
            view.error = None;
        });

        let store = self.ctx.store.clone();
        let root = self.ctx.conversations_root.clone();
        let key = self.chat_key.clone();
        let view_tx = self.view_tx.clone();
        self.task = Some(tokio::spawn(run_subscription(store, root, key, view_tx)));
    }

    /// Point the subscription at a different navigation parameter.
    ///
    /// A no-op when the derived key is unchanged. Otherwise the old store
    /// subscription is released, the message list cleared and, if mounted,
    /// a new subscription opened.
    pub async fn set_param(&mut self, raw_param: Option<&str>) {
        let key = ChatKey::derive(raw_param);
        if key == self.chat_key {
            return;
        }

        info!(from = %self.chat_key, to = %key, "Conversation key changed");
        let was_mounted = self.is_mounted();
        self.release().await;
        self.chat_key = key;
        self.view_tx.send_modify(|view| {
            view.chat_key = self.chat_key.clone();
            view.status = SyncStatus::Idle;
            view.messages.clear();
            view.error = None;
        });

        if was_mounted {
            self.mount().await;
        }
    }

    /// Stop listening. The last view stays readable.
    pub async fn unmount(&mut self) {
        self.release().await;
        self.view_tx.send_modify(|view| view.status = SyncStatus::Idle);
    }

    /// Append `draft` to the conversation.
    ///
    /// See [`SendOutcome`] for the clearing contract.
    pub async fn send(&self, draft: &mut String) -> SendOutcome {
        let text = draft.trim();
        if text.is_empty() {
            debug!(chat_key = %self.chat_key, "Ignoring empty message");
            return SendOutcome::EmptyText;
        }
        if self.ctx.session.current_user().is_none() {
            warn!(chat_key = %self.chat_key, "Cannot send without a signed-in user");
            return SendOutcome::NoIdentity;
        }

        let record = MessageRecord::outgoing(text, now_millis());
        draft.clear();

        let value = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Failed to encode outgoing message");
                return SendOutcome::Failed;
            }
        };

        let path = messages_path(&self.ctx.conversations_root, &self.chat_key);
        match self.ctx.store.append(&path, value).await {
            Ok(key) => {
                debug!(chat_key = %self.chat_key, message_id = %key, "Message sent");
                SendOutcome::Appended(key)
            }
            Err(e) => {
                error!(chat_key = %self.chat_key, error = %e, "Failed to send message");
                SendOutcome::Failed
            }
        }
    }

    /// Abort the listening task and wait until its store subscription has
    /// been dropped.
    async fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!(chat_key = %self.chat_key, "Conversation subscription released");
        }
    }
}

impl Drop for ConversationSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_subscription(
    store: Arc<dyn ConversationStore>,
    root: String,
    key: ChatKey,
    view_tx: watch::Sender<ConversationView>,
) {
    let path = messages_path(&root, &key);
    let mut subscription = match store.subscribe(&path).await {
        Ok(sub) => sub,
        Err(e) => {
            error!(chat_key = %key, error = %e, "Failed to subscribe to conversation");
            mark_errored(&view_tx);
            return;
        }
    };
    info!(chat_key = %key, "Subscribed to conversation");
    let receipts = Arc::new(Mutex::new(ReceiptTracker::default()));

    while let Some(event) = subscription.next().await {
        match event {
            StoreEvent::Snapshot(snapshot) => {
                let messages = messages_from_snapshot(snapshot.as_ref());
                let unread = unread_ids(&messages);
                let pending = lock_receipts(&receipts).claim(&unread);

                debug!(chat_key = %key, count = messages.len(), unread = unread.len(), "Conversation synced");
                view_tx.send_modify(|view| {
                    view.messages = messages;
                    view.status = SyncStatus::Synced;
                    view.error = None;
                });

                if !pending.is_empty() {
                    let store = store.clone();
                    let root = root.clone();
                    let key = key.clone();
                    let receipts = receipts.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            mark_read(store.as_ref(), &root, &key, &pending, now_millis()).await
                        {
                            warn!(chat_key = %key, error = %e, "Read receipts not written");
                            lock_receipts(&receipts).release(&pending);
                        }
                    });
                }
            }
            StoreEvent::Error(reason) => {
                warn!(chat_key = %key, reason = %reason, "Conversation listener cancelled");
                mark_errored(&view_tx);
                return;
            }
        }
    }
}

/// Message ids whose read receipts are being written.
///
/// Snapshots keep arriving while a receipt write is in flight and still show
/// the message as unread, so without this every event would rewrite `readAt`.
#[derive(Debug, Default)]
struct ReceiptTracker {
    in_flight: HashSet<String>,
}

impl ReceiptTracker {
    /// Drop ids that are no longer unread, then claim and return the unread
    /// ids that have no write in flight yet.
    fn claim(&mut self, unread: &[&str]) -> Vec<String> {
        let still_unread: HashSet<&str> = unread.iter().copied().collect();
        self.in_flight.retain(|id| still_unread.contains(id.as_str()));

        unread
            .iter()
            .filter(|id| self.in_flight.insert((**id).to_string()))
            .map(|id| (*id).to_string())
            .collect()
    }

    /// Make ids claimable again after a failed write.
    fn release(&mut self, ids: &[String]) {
        for id in ids {
            self.in_flight.remove(id);
        }
    }
}

fn lock_receipts(receipts: &Mutex<ReceiptTracker>) -> std::sync::MutexGuard<'_, ReceiptTracker> {
    receipts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn mark_errored(view_tx: &watch::Sender<ConversationView>) {
    view_tx.send_modify(|view| {
        view.status = SyncStatus::Errored;
        view.error = Some(CONNECTION_ERROR_MESSAGE.to_string());
    });
}

/// Write read receipts for `message_ids` in one atomic multi-path update.
///
/// Returns the number of messages marked. An empty selection issues no
/// write. Marking an already-read message rewrites the same flag, so the
/// procedure can run on every event.
pub async fn mark_read(
    store: &dyn ConversationStore,
    root: &str,
    key: &ChatKey,
    message_ids: &[String],
    read_at: i64,
) -> Result<usize, ClientError> {
    if message_ids.is_empty() {
        return Ok(0);
    }

    let mut updates = BTreeMap::new();
    for id in message_ids {
        updates.insert(
            message_field_path(root, key, id, FIELD_READ_BY_RECIPIENT),
            Value::Bool(true),
        );
        updates.insert(message_field_path(root, key, id, FIELD_READ_AT), Value::from(read_at));
    }

    store.multi_update(updates).await?;
    debug!(chat_key = %key, count = message_ids.len(), "Read receipts written");
    Ok(message_ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitchat_shared::conversation::unread_count;
    use fitchat_shared::types::{CurrentUser, Sender};
    use async_trait::async_trait;
    use fitchat_store::{MemoryStore, SessionDb, StoreError, Subscription};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        store: MemoryStore,
        session: Arc<SessionDb>,
        ctx: ChatContext,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let session = Arc::new(SessionDb::open_in_memory().unwrap());
        session
            .set_current_user(&CurrentUser {
                id: "7".into(),
                name: "Coach Marta".into(),
            })
            .unwrap();
        let ctx = ChatContext {
            store: Arc::new(store.clone()),
            session: session.clone(),
            conversations_root: "conversations".into(),
        };
        Fixture { store, session, ctx }
    }

    async fn wait_for(
        rx: &mut watch::Receiver<ConversationView>,
        pred: impl Fn(&ConversationView) -> bool,
    ) -> ConversationView {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if pred(&rx.borrow_and_update()) {
                    return rx.borrow().clone();
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("view never reached expected state")
    }

    fn stored_messages(store: &MemoryStore, key: &str) -> Vec<Message> {
        let snap = store
            .snapshot(&format!("conversations/{key}/messages"))
            .unwrap();
        messages_from_snapshot(snap.as_ref())
    }

    #[tokio::test]
    async fn test_empty_conversation_syncs_to_empty_list() {
        let f = fixture();
        let mut conv = ConversationSubscription::new(f.ctx.clone(), Some("nobody"));
        let mut rx = conv.watch();
        conv.mount().await;

        let view = wait_for(&mut rx, |v| v.status == SyncStatus::Synced).await;
        assert!(view.messages.is_empty());
        assert_eq!(view.chat_key.as_str(), "nobody");
    }

    #[tokio::test]
    async fn test_messages_ordered_and_counterparty_marked_read() {
        let f = fixture();
        f.store
            .set(
                "conversations/carlos_lopez/messages",
                json!({
                    "b": {"text": "second", "sender": "self", "createdAt": 2000},
                    "a": {"text": "hi", "sender": "counterparty", "createdAt": 1000},
                }),
            )
            .unwrap();

        let mut conv = ConversationSubscription::new(f.ctx.clone(), Some("carlos_lopez"));
        let mut rx = conv.watch();
        conv.mount().await;

        let view = wait_for(&mut rx, |v| {
            v.messages.len() == 2 && v.messages.iter().all(|m| m.sender != Sender::Counterparty || m.read_by_recipient)
        })
        .await;
        assert_eq!(view.messages[0].id, "a");
        assert_eq!(view.messages[1].id, "b");
        assert!(view.messages[0].read_at.is_some());

        let stored = stored_messages(&f.store, "carlos_lopez");
        assert_eq!(unread_count(&stored), 0);
        assert!(stored.iter().find(|m| m.id == "b").unwrap().read_at.is_none());
    }

    #[tokio::test]
    async fn test_mark_read_scenario_and_idempotence() {
        let f = fixture();
        f.store
            .set(
                "conversations/carlos_lopez/messages/a",
                json!({"text": "hi", "sender": "counterparty", "createdAt": 1000}),
            )
            .unwrap();
        let key = ChatKey::from_stored("carlos_lopez");
        assert_eq!(unread_count(&stored_messages(&f.store, "carlos_lopez")), 1);

        let ids = vec!["a".to_string()];
        assert_eq!(mark_read(&f.store, "conversations", &key, &ids, 5000).await.unwrap(), 1);
        let after_first = stored_messages(&f.store, "carlos_lopez");
        assert_eq!(unread_count(&after_first), 0);

        mark_read(&f.store, "conversations", &key, &ids, 5000).await.unwrap();
        let after_second = stored_messages(&f.store, "carlos_lopez");
        assert_eq!(after_first, after_second);
        assert!(after_second[0].read_by_recipient);
    }

    #[tokio::test]
    async fn test_mark_read_empty_selection_writes_nothing() {
        let f = fixture();
        f.store.reject_updates(Some("should not be called"));
        let key = ChatKey::from_stored("k");
        assert_eq!(mark_read(&f.store, "conversations", &key, &[], 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_receipts_do_not_block_display() {
        let f = fixture();
        f.store.reject_updates(Some("permission denied"));
        f.store
            .set(
                "conversations/k/messages/a",
                json!({"text": "hi", "sender": "counterparty", "createdAt": 1}),
            )
            .unwrap();

        let mut conv = ConversationSubscription::new(f.ctx.clone(), Some("k"));
        let mut rx = conv.watch();
        conv.mount().await;

        let view = wait_for(&mut rx, |v| v.status == SyncStatus::Synced).await;
        assert_eq!(view.messages.len(), 1);
        assert!(!view.messages[0].read_by_recipient);
        assert_eq!(conv.view().status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_send_appends_and_clears_draft() {
        let f = fixture();
        let mut conv = ConversationSubscription::new(f.ctx.clone(), Some("ana"));
        let mut rx = conv.watch();
        conv.mount().await;

        let mut draft = "  ¿Entrenamos mañana?  ".to_string();
        let outcome = conv.send(&mut draft).await;
        assert!(matches!(outcome, SendOutcome::Appended(_)));
        assert!(draft.is_empty());

        let view = wait_for(&mut rx, |v| v.messages.len() == 1).await;
        assert_eq!(view.messages[0].text, "¿Entrenamos mañana?");
        assert_eq!(view.messages[0].sender, Sender::Local);
    }

    #[tokio::test]
    async fn test_send_whitespace_is_dropped_silently() {
        let f = fixture();
        let conv = ConversationSubscription::new(f.ctx.clone(), Some("ana"));

        let mut draft = "   ".to_string();
        assert_eq!(conv.send(&mut draft).await, SendOutcome::EmptyText);
        assert!(f.store.snapshot("conversations").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_without_identity_is_dropped() {
        let f = fixture();
        f.session.clear().unwrap();
        let conv = ConversationSubscription::new(f.ctx.clone(), Some("ana"));

        let mut draft = "hola".to_string();
        assert_eq!(conv.send(&mut draft).await, SendOutcome::NoIdentity);
        assert_eq!(draft, "hola");
        assert!(f.store.snapshot("conversations").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listener_error_surfaces_and_keeps_messages() {
        let f = fixture();
        f.store
            .set(
                "conversations/k/messages/a",
                json!({"text": "hi", "sender": "self", "createdAt": 1}),
            )
            .unwrap();

        let mut conv = ConversationSubscription::new(f.ctx.clone(), Some("k"));
        let mut rx = conv.watch();
        conv.mount().await;
        wait_for(&mut rx, |v| v.status == SyncStatus::Synced).await;

        f.store.fail_listeners("conversations/k/messages", "offline").unwrap();
        let view = wait_for(&mut rx, |v| v.status == SyncStatus::Errored).await;
        assert_eq!(view.error.as_deref(), Some(CONNECTION_ERROR_MESSAGE));
        assert_eq!(view.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_refused_subscription_surfaces_error() {
        let f = fixture();
        f.store.refuse_subscriptions(Some("permission denied"));

        let mut conv = ConversationSubscription::new(f.ctx.clone(), Some("k"));
        let mut rx = conv.watch();
        conv.mount().await;

        let view = wait_for(&mut rx, |v| v.status == SyncStatus::Errored).await;
        assert_eq!(view.error.as_deref(), Some(CONNECTION_ERROR_MESSAGE));
        assert!(view.messages.is_empty());
        assert_eq!(f.store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_receipt_write_is_a_store_error() {
        let f = fixture();
        f.store.reject_updates(Some("permission denied"));
        let key = ChatKey::from_stored("k");
        let err = mark_read(&f.store, "conversations", &key, &["a".to_string()], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Store(StoreError::Rejected(_))));
    }

    #[test]
    fn test_receipt_tracker_claims_each_id_once() {
        let mut tracker = ReceiptTracker::default();
        assert_eq!(tracker.claim(&["a", "b"]), vec!["a", "b"]);
        assert!(tracker.claim(&["a", "b"]).is_empty());
        assert_eq!(tracker.claim(&["a", "b", "c"]), vec!["c"]);

        // A failed write hands the ids back.
        tracker.release(&["b".to_string()]);
        assert_eq!(tracker.claim(&["a", "b", "c"]), vec!["b"]);

        // Once a snapshot shows them read they are forgotten.
        assert!(tracker.claim(&[]).is_empty());
        assert_eq!(tracker.claim(&["a"]), vec!["a"]);
    }

    /// Delays and counts receipt writes so snapshots arrive while one is
    /// still in flight.
    struct SlowReceipts {
        inner: MemoryStore,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ConversationStore for SlowReceipts {
        async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
            self.inner.subscribe(path).await
        }

        async fn append(&self, path: &str, record: Value) -> Result<String, StoreError> {
            self.inner.append(path, record).await
        }

        async fn multi_update(&self, updates: BTreeMap<String, Value>) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.inner.multi_update(updates).await
        }
    }

    #[tokio::test]
    async fn test_receipts_written_once_while_events_keep_arriving() {
        let f = fixture();
        f.store
            .set(
                "conversations/k/messages/a",
                json!({"text": "hi", "sender": "counterparty", "createdAt": 1}),
            )
            .unwrap();
        let slow = Arc::new(SlowReceipts {
            inner: f.store.clone(),
            writes: AtomicUsize::new(0),
        });
        let ctx = ChatContext {
            store: slow.clone(),
            ..f.ctx.clone()
        };

        let mut conv = ConversationSubscription::new(ctx, Some("k"));
        let mut rx = conv.watch();
        conv.mount().await;
        wait_for(&mut rx, |v| v.messages.len() == 1).await;

        // More events while the first receipt write is still sleeping.
        for (id, at) in [("b", 2), ("c", 3)] {
            f.store
                .set(
                    &format!("conversations/k/messages/{id}"),
                    json!({"text": "me", "sender": "self", "createdAt": at}),
                )
                .unwrap();
        }

        let view = wait_for(&mut rx, |v| {
            v.messages.len() == 3 && v.messages.iter().all(|m| !m.is_unread_from_counterparty())
        })
        .await;
        let read_at = view.messages[0].read_at;
        assert!(read_at.is_some());

        f.store
            .set(
                "conversations/k/messages/d",
                json!({"text": "later", "sender": "self", "createdAt": 4}),
            )
            .unwrap();
        let view = wait_for(&mut rx, |v| v.messages.len() == 4).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(slow.writes.load(Ordering::SeqCst), 1);
        assert_eq!(view.messages[0].read_at, read_at);
        let stored = stored_messages(&f.store, "k");
        assert_eq!(stored[0].read_at, read_at);
    }

    #[tokio::test]
    async fn test_unmount_and_rekey_release_subscription() {
        let f = fixture();
        let mut conv = ConversationSubscription::new(f.ctx.clone(), Some("a"));
        let mut rx = conv.watch();
        conv.mount().await;
        wait_for(&mut rx, |v| v.status == SyncStatus::Synced).await;
        assert_eq!(f.store.listener_count(), 1);

        conv.set_param(Some("b%20c")).await;
        assert_eq!(conv.chat_key().as_str(), "b_c");
        wait_for(&mut rx, |v| v.status == SyncStatus::Synced && v.chat_key.as_str() == "b_c").await;
        assert_eq!(f.store.listener_count(), 1);

        conv.unmount().await;
        assert_eq!(f.store.listener_count(), 0);
        assert_eq!(conv.view().status, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_same_key_param_is_noop() {
        let f = fixture();
        let mut conv = ConversationSubscription::new(f.ctx.clone(), Some("a b"));
        conv.mount().await;
        conv.set_param(Some("a%20b")).await;
        assert!(conv.is_mounted());
        assert_eq!(conv.chat_key().as_str(), "a_b");
    }
}
