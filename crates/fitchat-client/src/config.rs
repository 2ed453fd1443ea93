//! Client configuration loaded from environment variables.
//!
//! Every setting has a default suitable for local development.

use std::path::PathBuf;

use fitchat_shared::constants::{DEFAULT_AVATAR_SERVICE, DEFAULT_CONVERSATIONS_ROOT};
use fitchat_store::{SessionDb, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Root of the REST API (roster lives at `{api_base_url}/clients`).
    /// Env: `FITCHAT_API_BASE_URL`
    /// Default: `http://localhost:3000/api`
    pub api_base_url: String,

    /// Store path under which every conversation lives.
    /// Env: `FITCHAT_CONVERSATIONS_ROOT`
    /// Default: `conversations`
    pub conversations_root: String,

    /// Avatar generator for counterparts without a picture.
    /// Env: `FITCHAT_AVATAR_URL`
    /// Default: `https://ui-avatars.com/api/`
    pub avatar_service_url: String,

    /// Session database file.
    /// Env: `FITCHAT_SESSION_DB`
    /// Default: platform data directory.
    pub session_db_path: Option<PathBuf>,

    /// Master switch for background notifications.
    /// Env: `FITCHAT_NOTIFICATIONS` (true/false)
    /// Default: `true`
    pub notifications_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            conversations_root: DEFAULT_CONVERSATIONS_ROOT.to_string(),
            avatar_service_url: DEFAULT_AVATAR_SERVICE.to_string(),
            session_db_path: None,
            notifications_enabled: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("FITCHAT_API_BASE_URL") {
            if url.starts_with("http://") || url.starts_with("https://") {
                config.api_base_url = url.trim_end_matches('/').to_string();
            } else {
                tracing::warn!(value = %url, "Invalid FITCHAT_API_BASE_URL, using default");
            }
        }

        if let Some(root) = lookup("FITCHAT_CONVERSATIONS_ROOT") {
            let root = root.trim_matches('/');
            if root.is_empty() || root.split('/').any(str::is_empty) {
                tracing::warn!(value = %root, "Invalid FITCHAT_CONVERSATIONS_ROOT, using default");
            } else {
                config.conversations_root = root.to_string();
            }
        }

        if let Some(url) = lookup("FITCHAT_AVATAR_URL") {
            if !url.is_empty() {
                config.avatar_service_url = url;
            }
        }

        if let Some(path) = lookup("FITCHAT_SESSION_DB") {
            if !path.is_empty() {
                config.session_db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("FITCHAT_NOTIFICATIONS") {
            config.notifications_enabled = val != "false" && val != "0";
        }

        config
    }

    /// Open the session database this configuration points at.
    pub fn open_session(&self) -> Result<SessionDb, StoreError> {
        match &self.session_db_path {
            Some(path) => SessionDb::open_at(path),
            None => SessionDb::new(),
        }
    }
}
