//! Lobby model - the core game room unit

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 80;

/// Hard cap on lobby capacity.
pub const MAX_CAPACITY: u32 = 128;

/// Capacity used when the caller does not specify one.
pub const DEFAULT_CAPACITY: u32 = 8;

/// A Lobby is a game room with capacity, visibility, and gating
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lobby {
    pub id: Uuid,
    /// Display name, unique across all lobbies
    pub title: String,
    /// The member with elevated authority, if any
    pub host_id: Option<i64>,
    /// If true no single member holds authority and the room
    /// survives its last departure
    pub hostless: bool,
    pub max_users: u32,
    /// Hidden lobbies are excluded from public listings but joinable
    /// by direct reference
    pub is_hidden: bool,
    /// Locked lobbies reject new joins regardless of capacity
    pub is_locked: bool,
    /// Argon2 hash; the plaintext is never stored
    pub password_hash: Option<String>,
    /// Open key/value map for game-specific room attributes
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lobby {
    pub fn new(attrs: &LobbyAttrs, password_hash: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: attrs.title.trim().to_string(),
            host_id: None,
            hostless: attrs.hostless,
            max_users: attrs.max_users,
            is_hidden: attrs.is_hidden,
            is_locked: attrs.is_locked,
            password_hash,
            metadata: attrs.metadata.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Attributes supplied when creating a lobby.
///
/// `password` is the plaintext gate; it is hashed before anything is
/// persisted and redacted from debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct LobbyAttrs {
    pub title: String,
    #[serde(default = "default_capacity")]
    pub max_users: u32,
    #[serde(default)]
    pub hostless: bool,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_capacity() -> u32 {
    DEFAULT_CAPACITY
}

impl Default for LobbyAttrs {
    fn default() -> Self {
        Self {
            title: String::new(),
            max_users: DEFAULT_CAPACITY,
            hostless: false,
            is_hidden: false,
            is_locked: false,
            password: None,
            metadata: Map::new(),
        }
    }
}

impl fmt::Debug for LobbyAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LobbyAttrs")
            .field("title", &self.title)
            .field("max_users", &self.max_users)
            .field("hostless", &self.hostless)
            .field("is_hidden", &self.is_hidden)
            .field("is_locked", &self.is_locked)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Partial settings change applied by the host (or any member of a
/// hostless lobby). Absent fields are left untouched.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LobbyUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_users: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,
    /// New plaintext password; hashed before storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Remove the password gate entirely
    #[serde(default)]
    pub clear_password: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl fmt::Debug for LobbyUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LobbyUpdate")
            .field("title", &self.title)
            .field("max_users", &self.max_users)
            .field("is_hidden", &self.is_hidden)
            .field("is_locked", &self.is_locked)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("clear_password", &self.clear_password)
            .field("metadata", &self.metadata)
            .finish()
    }
}
