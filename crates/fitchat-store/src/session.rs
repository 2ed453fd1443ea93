//! Signed-in user and bearer token lookup.

use fitchat_shared::types::CurrentUser;

/// Read access to the persisted session.
///
/// Lookups never fail: a missing or unreadable session reads as signed out.
pub trait SessionStore: Send + Sync {
    fn token(&self) -> Option<String>;
    fn current_user(&self) -> Option<CurrentUser>;
}
