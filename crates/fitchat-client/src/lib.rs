//! # fitchat-client
//!
//! Realtime chat synchronisation for the FitChat coaching app.
//!
//! - [`conversation::ConversationSubscription`] keeps one conversation live,
//!   marks counterpart messages as read and sends new ones.
//! - [`aggregator::UnreadAggregator`] watches every conversation at once and
//!   publishes the "recent chats" digest with unread counts, raising local
//!   notifications while the app is in the background.

pub mod aggregator;
pub mod config;
pub mod context;
pub mod conversation;
pub mod notify;
pub mod roster;

mod error;

use fitchat_shared::constants::APP_NAME;
use tracing_subscriber::{fmt, EnvFilter};

pub use error::ClientError;

/// Install the global `tracing` subscriber. Honours `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("fitchat_client=debug,fitchat_store=info,fitchat_shared=info,warn")
    });

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Starting {} client v{}", APP_NAME, env!("CARGO_PKG_VERSION"));
    }
}

/// Wall-clock time in epoch milliseconds, the unit every store timestamp uses.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn test_now_millis_is_epoch_millis() {
        // 2020-01-01T00:00:00Z
        assert!(now_millis() > 1_577_836_800_000);
    }
}
