//! Conversation key derivation.
//!
//! Screens receive the counterpart as an opaque, possibly URL-encoded
//! navigation parameter. Before it can address the realtime store it is
//! normalised into a [`ChatKey`]: decoded, then every character outside
//! `[A-Za-z0-9_]` replaced by `_`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_CHAT_KEY;

/// Storage-safe identifier of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChatKey(String);

impl ChatKey {
    /// Derive a key from a raw navigation parameter.
    ///
    /// Total and pure: malformed percent-encoding is kept verbatim and an
    /// empty result falls back to [`DEFAULT_CHAT_KEY`].
    pub fn derive(raw: Option<&str>) -> Self {
        let raw = raw.unwrap_or_default();
        let decoded = urlencoding::decode(raw)
            .map(|cow| cow.into_owned())
            .unwrap_or_else(|_| raw.to_string());

        let key = sanitize(&decoded);
        if key.is_empty() {
            Self(DEFAULT_CHAT_KEY.to_string())
        } else {
            Self(key)
        }
    }

    /// Wrap a key read back from the store. Store keys are already
    /// normalised, so no transformation is applied.
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased form used when matching keys against roster names.
    pub fn folded(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChatKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalise a display name into the key a conversation would have been
/// stored under had it been derived from that name.
///
/// Returns `None` for names that contain nothing but separators.
pub fn name_candidate_key(name: &str) -> Option<String> {
    let key = sanitize(name.trim()).to_lowercase();
    if key.is_empty() || key.chars().all(|c| c == '_') {
        None
    } else {
        Some(key)
    }
}

fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
