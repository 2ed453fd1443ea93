//! SQLite-backed session persistence.
//!
//! [`SessionDb`] keeps the bearer token and the signed-in user in a single
//! `session` key-value table. The connection sits behind a mutex so the
//! handle can be shared through an `Arc` by every chat component.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use fitchat_shared::types::CurrentUser;

use crate::error::{Result, StoreError};
use crate::migrations;
use crate::session::SessionStore;

const KEY_TOKEN: &str = "token";
const KEY_CURRENT_USER: &str = "current_user";

pub struct SessionDb {
    conn: Mutex<Connection>,
}

impl SessionDb {
    /// Open (or create) the session database in the platform data directory:
    /// - Linux:   `~/.local/share/fitchat/session.db`
    /// - macOS:   `~/Library/Application Support/com.fitchat.fitchat/session.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "fitchat", "fitchat").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("session.db");
        tracing::info!(path = %db_path.display(), "opening session database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a session database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.conn().path().map(PathBuf::from)
    }

    pub fn set_token(&self, token: &str) -> Result<()> {
        self.put(KEY_TOKEN, token)
    }

    pub fn set_current_user(&self, user: &CurrentUser) -> Result<()> {
        let json = serde_json::to_string(user)?;
        self.put(KEY_CURRENT_USER, &json)
    }

    /// Forget the session (logout).
    pub fn clear(&self) -> Result<()> {
        self.conn().execute("DELETE FROM session", [])?;
        tracing::info!("session cleared");
        Ok(())
    }

    pub fn load_token(&self) -> Result<Option<String>> {
        self.get(KEY_TOKEN)
    }

    pub fn load_current_user(&self) -> Result<Option<CurrentUser>> {
        match self.get(KEY_CURRENT_USER)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO session (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM session WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStore for SessionDb {
    fn token(&self) -> Option<String> {
        self.load_token().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read session token");
            None
        })
    }

    fn current_user(&self) -> Option<CurrentUser> {
        self.load_current_user().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read current user");
            None
        })
    }
}
