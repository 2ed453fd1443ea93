//! Local notifications and foreground/background tracking.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::error::ClientError;

/// A notification to show on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalNotification {
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}

/// Payload handed back to the app when the notification is tapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub chat_key: String,
    pub counterparty_id: String,
    pub unread_count: usize,
}

/// Device notification service.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn schedule(&self, notification: LocalNotification) -> Result<(), ClientError>;
}

/// Notifier that only writes to the log. Used on hosts without a
/// notification centre.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn schedule(&self, notification: LocalNotification) -> Result<(), ClientError> {
        info!(
            title = %notification.title,
            chat_key = %notification.data.chat_key,
            unread = notification.data.unread_count,
            "Local notification"
        );
        Ok(())
    }
}

/// Dispatch without waiting. Failures are logged and dropped.
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: LocalNotification) {
    tokio::spawn(async move {
        let chat_key = notification.data.chat_key.clone();
        if let Err(e) = notifier.schedule(notification).await {
            tracing::error!(chat_key = %chat_key, error = %e, "Failed to schedule notification");
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Foreground,
    Background,
}

/// Observable foreground/background state of the application.
///
/// Clones share the same state; the platform layer calls
/// [`AppLifecycle::set_state`] on every transition.
#[derive(Debug, Clone)]
pub struct AppLifecycle {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl AppLifecycle {
    pub fn new(initial: LifecycleState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_state(&self, state: LifecycleState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, current = ?state, "App lifecycle changed");
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn is_foreground(&self) -> bool {
        self.state() == LifecycleState::Foreground
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }
}

impl Default for AppLifecycle {
    fn default() -> Self {
        Self::new(LifecycleState::Foreground)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_shared_between_clones() {
        let lifecycle = AppLifecycle::default();
        let other = lifecycle.clone();
        let mut rx = lifecycle.subscribe();

        assert!(other.is_foreground());
        lifecycle.set_state(LifecycleState::Background);
        assert!(!other.is_foreground());

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LifecycleState::Background);
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let result = LogNotifier
            .schedule(LocalNotification {
                title: "Ana".into(),
                body: "hola".into(),
                data: NotificationData {
                    chat_key: "ana".into(),
                    counterparty_id: "42".into(),
                    unread_count: 1,
                },
            })
            .await;
        assert!(result.is_ok());
    }
}
