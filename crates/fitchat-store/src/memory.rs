//! In-process [`ConversationStore`].
//!
//! Holds the whole tree as a single JSON value behind a mutex and fans
//! snapshots out to listeners over unbounded channels. Writing `null`
//! removes a node and prunes parents left empty, so a conversation with no
//! messages simply stops existing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::remote::{ConversationStore, StoreEvent, Subscription};

struct Listener {
    segments: Vec<String>,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

struct Inner {
    tree: Value,
    listeners: HashMap<u64, Listener>,
    next_listener_id: u64,
    append_seq: u64,
    reject_updates: Option<String>,
    refuse_subscriptions: Option<String>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            tree: Value::Object(Map::new()),
            listeners: HashMap::new(),
            next_listener_id: 0,
            append_seq: 0,
            reject_updates: None,
            refuse_subscriptions: None,
        }
    }
}

/// Cheaply cloneable handle; clones share the same tree.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value at `path`, if any.
    pub fn snapshot(&self, path: &str) -> Result<Option<Value>> {
        let segments = split_path(path)?;
        let inner = self.lock();
        Ok(read(&inner.tree, &segments).cloned())
    }

    /// Overwrite a single path, notifying listeners.
    pub fn set(&self, path: &str, value: Value) -> Result<()> {
        let segments = split_path(path)?;
        let mut inner = self.lock();
        write(&mut inner.tree, &segments, value);
        notify(&mut inner, &[segments]);
        Ok(())
    }

    /// Cancel every listener attached exactly at `path` with an error event,
    /// the way a realtime backend revokes a listener.
    pub fn fail_listeners(&self, path: &str, reason: &str) -> Result<usize> {
        let segments = split_path(path)?;
        let mut inner = self.lock();
        let ids: Vec<u64> = inner
            .listeners
            .iter()
            .filter(|(_, l)| l.segments == segments)
            .map(|(id, _)| *id)
            .collect();

        for id in &ids {
            if let Some(listener) = inner.listeners.remove(id) {
                let _ = listener.tx.send(StoreEvent::Error(reason.to_string()));
            }
        }
        warn!(path, count = ids.len(), reason, "Cancelled listeners");
        Ok(ids.len())
    }

    /// While set, every `multi_update` fails without applying anything.
    pub fn reject_updates(&self, reason: Option<&str>) {
        self.lock().reject_updates = reason.map(str::to_string);
    }

    /// While set, every `subscribe` fails before a listener is attached.
    pub fn refuse_subscriptions(&self, reason: Option<&str>) {
        self.lock().refuse_subscriptions = reason.map(str::to_string);
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn subscribe(&self, path: &str) -> Result<Subscription> {
        let segments = split_path(path)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut inner = self.lock();
            if let Some(reason) = &inner.refuse_subscriptions {
                return Err(StoreError::Listener(reason.clone()));
            }
            let id = inner.next_listener_id;
            inner.next_listener_id += 1;

            let current = read(&inner.tree, &segments).cloned();
            let _ = tx.send(StoreEvent::Snapshot(current));
            inner.listeners.insert(id, Listener { segments, tx });
            id
        };

        debug!(path, listener = id, "Listener attached");

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(path, rx, move || {
            if let Some(inner) = weak.upgrade() {
                lock_inner(&inner).listeners.remove(&id);
            }
        }))
    }

    async fn append(&self, path: &str, record: Value) -> Result<String> {
        let mut segments = split_path(path)?;
        let mut inner = self.lock();

        inner.append_seq += 1;
        let key = format!(
            "{:013}{:06}",
            chrono::Utc::now().timestamp_millis(),
            inner.append_seq % 1_000_000
        );
        segments.push(key.clone());

        write(&mut inner.tree, &segments, record);
        notify(&mut inner, &[segments]);
        Ok(key)
    }

    async fn multi_update(&self, updates: BTreeMap<String, Value>) -> Result<()> {
        let parsed = updates
            .into_iter()
            .map(|(path, value)| split_path(&path).map(|segments| (segments, value)))
            .collect::<Result<Vec<_>>>()?;

        let mut inner = self.lock();
        if let Some(reason) = &inner.reject_updates {
            return Err(StoreError::Rejected(reason.clone()));
        }

        let mut touched = Vec::with_capacity(parsed.len());
        for (segments, value) in parsed {
            write(&mut inner.tree, &segments, value);
            touched.push(segments);
        }
        notify(&mut inner, &touched);
        Ok(())
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    // A panic while holding the lock leaves the tree in a consistent state
    // (every write is a single assignment), so poisoning is ignored.
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn split_path(path: &str) -> Result<Vec<String>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

fn read<'a>(tree: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = tree;
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    if is_empty_node(node) {
        None
    } else {
        Some(node)
    }
}

fn write(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        write(child, rest, value);
        if is_empty_node(child) {
            map.remove(head);
        }
    }
}

fn is_empty_node(node: &Value) -> bool {
    match node {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn is_prefix(a: &[String], b: &[String]) -> bool {
    a.len() <= b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

/// Send one fresh snapshot to every listener related to any written path.
fn notify(inner: &mut Inner, written: &[Vec<String>]) {
    let affected: HashSet<u64> = inner
        .listeners
        .iter()
        .filter(|(_, l)| {
            written
                .iter()
                .any(|w| is_prefix(&l.segments, w) || is_prefix(w, &l.segments))
        })
        .map(|(id, _)| *id)
        .collect();

    let mut closed = Vec::new();
    for id in affected {
        if let Some(listener) = inner.listeners.get(&id) {
            let snapshot = read(&inner.tree, &listener.segments).cloned();
            if listener.tx.send(StoreEvent::Snapshot(snapshot)).is_err() {
                closed.push(id);
            }
        }
    }
    for id in closed {
        inner.listeners.remove(&id);
    }
}
