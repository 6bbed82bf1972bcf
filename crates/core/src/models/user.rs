//! User model
//!
//! Accounts live in the identity subsystem; this layer only sees a stable
//! integer identity plus the current-lobby reference. Membership is NOT a
//! separate row: it is the nullable `lobby_id` slot on the user record,
//! which is what makes "one lobby at a time" a single-row fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user record as seen by the session layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// The lobby this user currently occupies, if any
    pub lobby_id: Option<Uuid>,
    pub lobby_joined_at: Option<DateTime<Utc>>,
    /// Monotone seat counter; totally orders joins so host election
    /// has no ties by construction
    pub lobby_joined_seq: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_seated(&self) -> bool {
        self.lobby_id.is_some()
    }
}

/// A member of a lobby in join order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSeat {
    pub user_id: i64,
    pub username: String,
    pub joined_at: DateTime<Utc>,
    pub joined_seq: i64,
}
