//! User storage operations
//!
//! Seating and unseating are single-row updates on the user record; the
//! seat sequence is drawn from a global monotone counter so per-lobby
//! join order is total.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_datetime_opt, parse_uuid_opt, OptionalExt};
use crate::error::Result;
use crate::models::User;

pub struct UserStore<'a> {
    conn: &'a Connection,
}

impl<'a> UserStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a user record with a store-assigned integer identity
    #[instrument(skip(self))]
    pub fn create(&self, username: &str) -> Result<User> {
        let created_at = Utc::now();
        self.conn.execute(
            "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
            params![username, created_at.to_rfc3339()],
        )?;

        Ok(User {
            id: self.conn.last_insert_rowid(),
            username: username.to_string(),
            lobby_id: None,
            lobby_joined_at: None,
            lobby_joined_seq: None,
            created_at,
        })
    }

    /// Find user by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, username, lobby_id, lobby_joined_at, lobby_joined_seq, created_at
             FROM users WHERE id = ?1",
        )?;

        let user = stmt
            .query_row(params![id], |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    lobby_id: parse_uuid_opt(row.get::<_, Option<String>>(2)?)?,
                    lobby_joined_at: parse_datetime_opt(row.get::<_, Option<String>>(3)?)?,
                    lobby_joined_seq: row.get(4)?,
                    created_at: parse_datetime(&row.get::<_, String>(5)?)?,
                })
            })
            .optional()?;

        Ok(user)
    }

    /// The lobby a user currently occupies, if any
    #[instrument(skip(self))]
    pub fn current_lobby(&self, user_id: i64) -> Result<Option<Uuid>> {
        let lobby_id: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT lobby_id FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(parse_uuid_opt(lobby_id.flatten())?)
    }

    /// Seat a user in a lobby, stamping join time and the next seat
    /// sequence number
    #[instrument(skip(self))]
    pub fn seat(&self, user_id: i64, lobby_id: Uuid) -> Result<()> {
        self.conn.execute(
            "UPDATE users
             SET lobby_id = ?1,
                 lobby_joined_at = ?2,
                 lobby_joined_seq = (SELECT COALESCE(MAX(lobby_joined_seq), 0) + 1 FROM users)
             WHERE id = ?3",
            params![
                lobby_id.to_string(),
                Utc::now().to_rfc3339(),
                user_id
            ],
        )?;
        Ok(())
    }

    /// Clear a user's membership
    #[instrument(skip(self))]
    pub fn unseat(&self, user_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE users
             SET lobby_id = NULL, lobby_joined_at = NULL, lobby_joined_seq = NULL
             WHERE id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    /// Clear every seat pointing at a lobby (used on explicit delete)
    #[instrument(skip(self))]
    pub fn unseat_all(&self, lobby_id: Uuid) -> Result<()> {
        self.conn.execute(
            "UPDATE users
             SET lobby_id = NULL, lobby_joined_at = NULL, lobby_joined_seq = NULL
             WHERE lobby_id = ?1",
            params![lobby_id.to_string()],
        )?;
        Ok(())
    }
}
