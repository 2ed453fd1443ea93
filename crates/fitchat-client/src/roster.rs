//! Counterpart roster: REST fetch, envelope probing and identity lookup.
//!
//! The `/clients` endpoint has shipped several response envelopes over
//! time. [`extract_roster`] tries a fixed list of known shapes in order and
//! takes the first one that yields an array; anything else reads as an
//! empty roster.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use fitchat_shared::chat_key::{name_candidate_key, ChatKey};
use fitchat_shared::constants::SYNTHETIC_NAME_PREFIX;
use fitchat_shared::types::RosterEntry;

use crate::error::ClientError;

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch_roster(&self, token: &str) -> Result<Vec<RosterEntry>, ClientError>;
}

/// `GET {base_url}/clients` with bearer authorisation.
#[derive(Debug, Clone)]
pub struct HttpRosterClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRosterClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn clients_url(&self) -> String {
        format!("{}/clients", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl RosterSource for HttpRosterClient {
    async fn fetch_roster(&self, token: &str) -> Result<Vec<RosterEntry>, ClientError> {
        let url = self.clients_url();
        debug!(url = %url, "Fetching roster");

        let resp = self.http.get(&url).bearer_auth(token).send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status().as_u16()));
        }

        let body: Value = resp.json().await?;
        Ok(extract_roster(&body))
    }
}

/// Fetch the roster, treating every failure as an empty roster.
pub async fn load_roster_or_empty(source: &dyn RosterSource, token: Option<&str>) -> Vec<RosterEntry> {
    let result = match token {
        Some(token) => source.fetch_roster(token).await,
        None => Err(ClientError::NotSignedIn),
    };

    match result {
        Ok(entries) => {
            info!(count = entries.len(), "Roster loaded");
            entries
        }
        Err(e) => {
            warn!(error = %e, "Roster unavailable, continuing without roster");
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope probing
// ---------------------------------------------------------------------------

type Extractor = fn(&Value) -> Option<&Vec<Value>>;

fn bare_array(v: &Value) -> Option<&Vec<Value>> {
    v.as_array()
}

fn data_array(v: &Value) -> Option<&Vec<Value>> {
    v.get("data")?.as_array()
}

fn paginated_data(v: &Value) -> Option<&Vec<Value>> {
    v.get("data")?.get("data")?.as_array()
}

fn data_clients(v: &Value) -> Option<&Vec<Value>> {
    v.get("data")?.get("clients")?.as_array()
}

fn clients_field(v: &Value) -> Option<&Vec<Value>> {
    v.get("clients")?.as_array()
}

fn items_field(v: &Value) -> Option<&Vec<Value>> {
    v.get("items")?.as_array()
}

fn results_field(v: &Value) -> Option<&Vec<Value>> {
    v.get("results")?.as_array()
}

/// Known envelopes, most common first.
const ENVELOPES: &[(&str, Extractor)] = &[
    ("array", bare_array),
    ("data", data_array),
    ("data.data", paginated_data),
    ("data.clients", data_clients),
    ("clients", clients_field),
    ("items", items_field),
    ("results", results_field),
];

/// Pull roster entries out of whatever envelope the API returned.
pub fn extract_roster(body: &Value) -> Vec<RosterEntry> {
    let found = ENVELOPES
        .iter()
        .find_map(|(name, extract)| extract(body).map(|records| (*name, records)));

    let Some((envelope, records)) = found else {
        warn!("Unrecognised roster response shape, treating as empty");
        return Vec::new();
    };

    let entries: Vec<RosterEntry> = records.iter().filter_map(parse_roster_entry).collect();
    debug!(
        envelope,
        records = records.len(),
        parsed = entries.len(),
        "Roster envelope matched"
    );
    entries
}

fn first_string(record: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match record.get(*field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn parse_roster_entry(record: &Value) -> Option<RosterEntry> {
    let id = match record.get("id")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let display_name = first_string(
        record,
        &["displayName", "display_name", "name", "fullName", "full_name"],
    )
    .or_else(|| {
        let parts: Vec<String> = ["first_name", "last_name", "firstName", "lastName"]
            .iter()
            .filter_map(|f| first_string(record, &[*f]))
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    })
    .unwrap_or_else(|| format!("{SYNTHETIC_NAME_PREFIX} {id}"));

    let is_active = ["isActive", "is_active", "active"]
        .iter()
        .find_map(|f| record.get(*f)?.as_bool())
        .or_else(|| {
            record
                .get("status")?
                .as_str()
                .map(|s| matches!(s.to_lowercase().as_str(), "active" | "activo"))
        })
        .unwrap_or(true);

    Some(RosterEntry {
        id,
        display_name,
        avatar_url: first_string(record, &["avatarUrl", "avatar_url", "avatar", "photo"]),
        email: first_string(record, &["email"]),
        is_active,
    })
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Resolved identity of a conversation's counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterparty {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub is_active: bool,
}

/// Roster indexed by id, with a secondary index by normalised display name
/// for conversations whose key was derived from a name.
#[derive(Debug, Clone, Default)]
pub struct RosterIndex {
    by_id: HashMap<String, RosterEntry>,
    by_name: HashMap<String, RosterEntry>,
}

impl RosterIndex {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            if let Some(candidate) = name_candidate_key(&entry.display_name) {
                index.by_name.entry(candidate).or_insert_with(|| entry.clone());
            }
            index.by_id.entry(entry.id.clone()).or_insert(entry);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Exact id match first, then normalised-name match.
    pub fn lookup(&self, key: &ChatKey) -> Option<&RosterEntry> {
        self.by_id
            .get(key.as_str())
            .or_else(|| self.by_name.get(&key.folded()))
    }

    /// Resolve a counterpart, synthesising one from the key when the roster
    /// has no match.
    pub fn resolve(&self, key: &ChatKey, avatar_service: &str) -> Counterparty {
        match self.lookup(key) {
            Some(entry) => Counterparty {
                id: entry.id.clone(),
                name: entry.display_name.clone(),
                avatar: entry
                    .avatar_url
                    .clone()
                    .unwrap_or_else(|| generated_avatar(avatar_service, &entry.display_name)),
                is_active: entry.is_active,
            },
            None => {
                let name = format!("{SYNTHETIC_NAME_PREFIX} {key}");
                Counterparty {
                    id: key.to_string(),
                    avatar: generated_avatar(avatar_service, &name),
                    name,
                    is_active: false,
                }
            }
        }
    }
}

/// URL of an initials avatar for `name`.
pub fn generated_avatar(service: &str, name: &str) -> String {
    format!(
        "{}?name={}&background=random",
        service.trim_end_matches('?'),
        urlencoding::encode(name)
    )
}
