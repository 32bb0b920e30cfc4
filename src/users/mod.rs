//! Registered trading accounts, read from the JSON file the registration bot writes.
//!
//! The file is either an array of `{ id, apiKey, apiSecret, active }` objects or
//! an object keyed by user id. It is re-read on every cycle so registrations and
//! deactivations take effect without a restart.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub api_key: String,
    pub api_secret: String,
}

// Keep secrets out of logs
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("api_key", &mask(&self.api_key))
            .finish()
    }
}

fn mask(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{}***", visible)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    api_secret: Option<String>,
    #[serde(default)]
    active: Option<bool>,
}

impl UserRecord {
    fn into_user(self, fallback_id: Option<String>) -> Option<User> {
        if self.active != Some(true) {
            return None;
        }
        let api_key = self.api_key.filter(|k| !k.is_empty())?;
        let api_secret = self.api_secret.filter(|s| !s.is_empty())?;

        let id = match self.id {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => fallback_id?,
        };

        Some(User { id, api_key, api_secret })
    }
}

/// One entry of the file. Entries that are not user objects are dropped on their own.
fn record_to_user(value: serde_json::Value, fallback_id: Option<String>) -> Option<User> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<UserRecord>(value) {
        Ok(record) => record.into_user(fallback_id),
        Err(e) => {
            debug!("Skipping malformed user record {:?}: {}", fallback_id, e);
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserStore {
    path: PathBuf,
}

impl UserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Active users with both API key and secret. Missing or empty file means no users.
    pub fn load(&self) -> Result<Vec<User>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Users file {} not found", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", self.path.display())),
        };

        let users = parse_users(&raw).with_context(|| format!("parsing {}", self.path.display()))?;
        debug!("Loaded {} active users from {}", users.len(), self.path.display());
        Ok(users)
    }

    /// Like [`load`](Self::load) but logs and returns no users on a broken file.
    pub fn load_or_empty(&self) -> Vec<User> {
        self.load().unwrap_or_else(|e| {
            warn!("❌ Failed to load users: {:#}", e);
            Vec::new()
        })
    }
}

pub fn parse_users(raw: &str) -> Result<Vec<User>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let mut users: Vec<User> = match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Array(records) => records
            .into_iter()
            .filter_map(|r| record_to_user(r, None))
            .collect(),
        serde_json::Value::Object(records) => records
            .into_iter()
            .filter_map(|(key, r)| record_to_user(r, Some(key)))
            .collect(),
        other => anyhow::bail!("expected an array or object of users, got {}", json_kind(&other)),
    };

    // Stable order regardless of file layout
    users.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(users)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
