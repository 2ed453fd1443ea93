//! The realtime conversation store seam.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

/// Something delivered to a live subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Full value at the subscribed path. `None` when nothing is stored there.
    Snapshot(Option<Value>),
    /// The listener was cancelled by the store (permissions, connectivity).
    /// No further events follow.
    Error(String),
}

/// A live listener on one store path.
///
/// Events arrive in the order the store emits them. Dropping the
/// subscription detaches the listener.
pub struct Subscription {
    path: String,
    events: mpsc::UnboundedReceiver<StoreEvent>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        path: impl Into<String>,
        events: mpsc::UnboundedReceiver<StoreEvent>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            events,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next event. `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.events.recv().await
    }

    /// Take an already queued event without waiting.
    pub fn try_next(&mut self) -> Option<StoreEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            tracing::debug!(path = %self.path, "Releasing store subscription");
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("path", &self.path).finish()
    }
}

/// Hierarchical key-value store with change subscriptions.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Attach a listener to `path`. The current value is delivered first,
    /// followed by a fresh snapshot after every change at, above or below
    /// `path`.
    async fn subscribe(&self, path: &str) -> Result<Subscription>;

    /// Write `record` under a new unique child key of `path` and return
    /// that key.
    async fn append(&self, path: &str, record: Value) -> Result<String>;

    /// Apply every `path -> value` write atomically. `Value::Null` removes.
    async fn multi_update(&self, updates: BTreeMap<String, Value>) -> Result<()>;
}
