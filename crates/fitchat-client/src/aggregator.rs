//! Cross-conversation digest for the "recent chats" list.
//!
//! [`UnreadAggregator`] subscribes to the conversations root, resolves every
//! conversation's counterpart against the roster and republishes a digest
//! sorted by most recent activity. When a conversation's unread count grows
//! while the app is in the background, one local notification is raised for
//! it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fitchat_shared::chat_key::ChatKey;
use fitchat_shared::constants::CONNECTION_ERROR_MESSAGE;
use fitchat_shared::conversation::{conversations_from_root, ConversationSummary};
use fitchat_shared::types::{DigestEntry, Message};
use fitchat_store::{ConversationStore, StoreEvent};

use crate::config::ClientConfig;
use crate::context::ChatContext;
use crate::conversation::SyncStatus;
use crate::notify::{dispatch, AppLifecycle, LocalNotification, NotificationData, Notifier};
use crate::roster::{load_roster_or_empty, RosterIndex, RosterSource};

/// Published digest. Replaced as a whole on every store event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestState {
    pub status: SyncStatus,
    /// Descending by `last_message_at`.
    pub entries: Vec<DigestEntry>,
    pub error: Option<String>,
}

impl DigestState {
    pub fn total_unread(&self) -> usize {
        self.entries.iter().map(|e| e.unread_count).sum()
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub avatar_service_url: String,
    pub notifications_enabled: bool,
}

impl From<&ClientConfig> for AggregatorSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            avatar_service_url: config.avatar_service_url.clone(),
            notifications_enabled: config.notifications_enabled,
        }
    }
}

// ---------------------------------------------------------------------------
// Unread tracking
// ---------------------------------------------------------------------------

/// Last unread count seen per conversation, used to notify only once per
/// increase.
#[derive(Debug, Default)]
pub struct UnreadTracker {
    previous: HashMap<ChatKey, usize>,
}

impl UnreadTracker {
    /// Record `count` for `key`; true when it exceeds the previous count.
    /// Unseen keys start from zero.
    pub fn observe(&mut self, key: &ChatKey, count: usize) -> bool {
        let previous = self.previous.insert(key.clone(), count).unwrap_or(0);
        count > previous
    }

    pub fn previous(&self, key: &ChatKey) -> Option<usize> {
        self.previous.get(key).copied()
    }
}

// ---------------------------------------------------------------------------
// Digest computation
// ---------------------------------------------------------------------------

/// Per-event inputs that are not part of the store snapshot.
#[derive(Debug, Clone, Copy)]
pub struct DigestOptions<'a> {
    pub foreground: bool,
    pub notifications_enabled: bool,
    pub avatar_service: &'a str,
}

/// Build the digest for one root snapshot.
///
/// Updates `tracker` for every non-empty conversation and returns the
/// notifications to raise alongside the sorted entries.
pub fn build_digest(
    conversations: Vec<(ChatKey, Vec<Message>)>,
    roster: &RosterIndex,
    tracker: &mut UnreadTracker,
    options: DigestOptions<'_>,
) -> (Vec<DigestEntry>, Vec<LocalNotification>) {
    let mut entries = Vec::with_capacity(conversations.len());
    let mut alerts = Vec::new();

    for (key, messages) in conversations {
        let Some(summary) = ConversationSummary::from_messages(key, &messages) else {
            continue;
        };
        let who = roster.resolve(&summary.chat_key, options.avatar_service);

        let grew = tracker.observe(&summary.chat_key, summary.unread_count);
        if grew && !options.foreground && options.notifications_enabled {
            if let Some(latest) = &summary.latest_unread {
                alerts.push(LocalNotification {
                    title: who.name.clone(),
                    body: latest.text.clone(),
                    data: NotificationData {
                        chat_key: summary.chat_key.to_string(),
                        counterparty_id: who.id.clone(),
                        unread_count: summary.unread_count,
                    },
                });
            }
        }

        entries.push(DigestEntry {
            chat_key: summary.chat_key,
            counterparty_id: who.id,
            counterparty_name: who.name,
            counterparty_avatar: who.avatar,
            last_message_text: summary.last_message.text,
            last_message_at: summary.last_message.created_at,
            unread_count: summary.unread_count,
            is_active: who.is_active,
        });
    }

    entries.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then_with(|| a.chat_key.cmp(&b.chat_key))
    });
    (entries, alerts)
}

// ---------------------------------------------------------------------------
// Live component
// ---------------------------------------------------------------------------

pub struct UnreadAggregator {
    ctx: ChatContext,
    roster: Arc<dyn RosterSource>,
    notifier: Arc<dyn Notifier>,
    lifecycle: AppLifecycle,
    settings: AggregatorSettings,
    tracker: Arc<Mutex<UnreadTracker>>,
    state_tx: watch::Sender<DigestState>,
    mounted_token: Option<String>,
    task: Option<JoinHandle<()>>,
}

impl UnreadAggregator {
    pub fn new(
        ctx: ChatContext,
        roster: Arc<dyn RosterSource>,
        notifier: Arc<dyn Notifier>,
        lifecycle: AppLifecycle,
        settings: AggregatorSettings,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(DigestState {
            status: SyncStatus::Idle,
            entries: Vec::new(),
            error: None,
        });

        Self {
            ctx,
            roster,
            notifier,
            lifecycle,
            settings,
            tracker: Arc::new(Mutex::new(UnreadTracker::default())),
            state_tx,
            mounted_token: None,
            task: None,
        }
    }

    pub fn state(&self) -> DigestState {
        self.state_tx.borrow().clone()
    }

    pub fn digest(&self) -> Vec<DigestEntry> {
        self.state_tx.borrow().entries.clone()
    }

    pub fn total_unread(&self) -> usize {
        self.state_tx.borrow().total_unread()
    }

    pub fn watch(&self) -> watch::Receiver<DigestState> {
        self.state_tx.subscribe()
    }

    pub fn is_mounted(&self) -> bool {
        self.task.is_some()
    }

    /// Fetch the roster and start watching every conversation. Mounting
    /// again restarts from a fresh roster fetch.
    pub async fn mount(&mut self) {
        self.release().await;

        let token = self.ctx.session.token();
        self.mounted_token = token.clone();
        self.state_tx.send_modify(|state| {
            state.status = SyncStatus::Subscribing;
            state.error = None;
        });

        let job = AggregatorJob {
            store: self.ctx.store.clone(),
            root: self.ctx.conversations_root.clone(),
            token,
            roster: self.roster.clone(),
            notifier: self.notifier.clone(),
            lifecycle: self.lifecycle.clone(),
            settings: self.settings.clone(),
            tracker: self.tracker.clone(),
            state_tx: self.state_tx.clone(),
        };
        self.task = Some(tokio::spawn(job.run()));
    }

    /// Re-read the session token and restart when it changed since mount.
    /// Returns whether a restart happened.
    pub async fn refresh(&mut self) -> bool {
        if !self.is_mounted() {
            return false;
        }
        let token = self.ctx.session.token();
        if token == self.mounted_token {
            return false;
        }
        info!("Session token changed, restarting chat digest");
        self.mount().await;
        true
    }

    /// Stop watching. The last digest stays readable.
    pub async fn unmount(&mut self) {
        self.release().await;
        self.state_tx.send_modify(|state| state.status = SyncStatus::Idle);
    }

    async fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!("Chat digest subscription released");
        }
    }
}

impl Drop for UnreadAggregator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct AggregatorJob {
    store: Arc<dyn ConversationStore>,
    root: String,
    token: Option<String>,
    roster: Arc<dyn RosterSource>,
    notifier: Arc<dyn Notifier>,
    lifecycle: AppLifecycle,
    settings: AggregatorSettings,
    tracker: Arc<Mutex<UnreadTracker>>,
    state_tx: watch::Sender<DigestState>,
}

impl AggregatorJob {
    async fn run(self) {
        let roster =
            RosterIndex::new(load_roster_or_empty(self.roster.as_ref(), self.token.as_deref()).await);

        let mut subscription = match self.store.subscribe(&self.root).await {
            Ok(sub) => sub,
            Err(e) => {
                error!(root = %self.root, error = %e, "Failed to subscribe to conversations");
                self.mark_errored();
                return;
            }
        };
        info!(root = %self.root, roster = roster.len(), "Watching conversations");

        while let Some(event) = subscription.next().await {
            match event {
                StoreEvent::Snapshot(snapshot) => {
                    let conversations = conversations_from_root(snapshot.as_ref());
                    let options = DigestOptions {
                        foreground: self.lifecycle.is_foreground(),
                        notifications_enabled: self.settings.notifications_enabled,
                        avatar_service: &self.settings.avatar_service_url,
                    };

                    let (entries, alerts) = {
                        let mut tracker = self
                            .tracker
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        build_digest(conversations, &roster, &mut tracker, options)
                    };

                    debug!(
                        conversations = entries.len(),
                        notifications = alerts.len(),
                        "Chat digest rebuilt"
                    );
                    for alert in alerts {
                        dispatch(self.notifier.clone(), alert);
                    }
                    self.state_tx.send_modify(|state| {
                        state.entries = entries;
                        state.status = SyncStatus::Synced;
                        state.error = None;
                    });
                }
                StoreEvent::Error(reason) => {
                    warn!(root = %self.root, reason = %reason, "Conversations listener cancelled");
                    self.mark_errored();
                    return;
                }
            }
        }
    }

    /// Keep the last good digest; only the status and message change.
    fn mark_errored(&self) {
        self.state_tx.send_modify(|state| {
            state.status = SyncStatus::Errored;
            state.error = Some(CONNECTION_ERROR_MESSAGE.to_string());
        });
    }
}
