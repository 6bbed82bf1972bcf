//! Lobby storage operations

use std::collections::HashMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use super::parse::{parse_datetime, parse_metadata, parse_uuid, OptionalExt};
use crate::error::Result;
use crate::models::{Lobby, MemberSeat};

const LOBBY_COLUMNS: &str = "id, title, host_id, hostless, max_users, is_hidden, is_locked, \
                             password_hash, metadata, created_at, updated_at";

/// Filters applied in SQL. Metadata matching is deliberately NOT here: it
/// runs in memory after the query, since JSON querying is not assumed of
/// the store.
#[derive(Debug, Clone, Default)]
pub struct LobbyFilter {
    /// Case-insensitive title substring
    pub title_contains: Option<String>,
    /// Tri-state: Some(true) = passworded only, Some(false) = open only
    pub has_password: Option<bool>,
    /// Tri-state lock filter
    pub locked: Option<bool>,
    pub min_capacity: Option<u32>,
    pub max_capacity: Option<u32>,
    /// Key presence / case-insensitive value substring, matched in memory
    pub metadata: HashMap<String, Option<String>>,
    pub offset: u32,
    pub limit: Option<u32>,
}

/// Pure counts for operational dashboards
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LobbyStats {
    pub total: u64,
    pub hostless: u64,
    pub hidden: u64,
    pub locked: u64,
    pub passworded: u64,
}

pub struct LobbyStore<'a> {
    conn: &'a Connection,
}

impl<'a> LobbyStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_lobby(row: &Row<'_>) -> rusqlite::Result<Lobby> {
        Ok(Lobby {
            id: parse_uuid(&row.get::<_, String>(0)?)?,
            title: row.get(1)?,
            host_id: row.get(2)?,
            hostless: row.get::<_, i32>(3)? != 0,
            max_users: row.get::<_, i64>(4)? as u32,
            is_hidden: row.get::<_, i32>(5)? != 0,
            is_locked: row.get::<_, i32>(6)? != 0,
            password_hash: row.get(7)?,
            metadata: parse_metadata(&row.get::<_, String>(8)?)?,
            created_at: parse_datetime(&row.get::<_, String>(9)?)?,
            updated_at: parse_datetime(&row.get::<_, String>(10)?)?,
        })
    }

    /// Insert a new lobby row
    #[instrument(skip(self, lobby), fields(lobby_id = %lobby.id, title = %lobby.title))]
    pub fn create(&self, lobby: &Lobby) -> Result<()> {
        self.conn.execute(
            "INSERT INTO lobbies (id, title, host_id, hostless, max_users, is_hidden, is_locked,
                                  password_hash, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                lobby.id.to_string(),
                lobby.title,
                lobby.host_id,
                lobby.hostless as i32,
                lobby.max_users as i64,
                lobby.is_hidden as i32,
                lobby.is_locked as i32,
                lobby.password_hash,
                serde_json::to_string(&lobby.metadata)?,
                lobby.created_at.to_rfc3339(),
                lobby.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Find lobby by ID
    #[instrument(skip(self))]
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Lobby>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {LOBBY_COLUMNS} FROM lobbies WHERE id = ?1"))?;

        let lobby = stmt
            .query_row(params![id.to_string()], Self::row_to_lobby)
            .optional()?;

        Ok(lobby)
    }

    /// Find lobby by its unique title
    #[instrument(skip(self))]
    pub fn find_by_title(&self, title: &str) -> Result<Option<Lobby>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {LOBBY_COLUMNS} FROM lobbies WHERE title = ?1"))?;

        let lobby = stmt
            .query_row(params![title], Self::row_to_lobby)
            .optional()?;

        Ok(lobby)
    }

    /// Write back every mutable column of a lobby row
    #[instrument(skip(self, lobby), fields(lobby_id = %lobby.id))]
    pub fn update(&self, lobby: &Lobby) -> Result<()> {
        self.conn.execute(
            "UPDATE lobbies SET title = ?1, host_id = ?2, hostless = ?3, max_users = ?4,
                                is_hidden = ?5, is_locked = ?6, password_hash = ?7,
                                metadata = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                lobby.title,
                lobby.host_id,
                lobby.hostless as i32,
                lobby.max_users as i64,
                lobby.is_hidden as i32,
                lobby.is_locked as i32,
                lobby.password_hash,
                serde_json::to_string(&lobby.metadata)?,
                lobby.updated_at.to_rfc3339(),
                lobby.id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Delete a lobby row
    #[instrument(skip(self))]
    pub fn delete(&self, id: Uuid) -> Result<()> {
        self.conn
            .execute("DELETE FROM lobbies WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    /// Current occupancy of a lobby
    #[instrument(skip(self))]
    pub fn member_count(&self, id: Uuid) -> Result<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM users WHERE lobby_id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Members of a lobby ordered by their seat sequence (join order)
    #[instrument(skip(self))]
    pub fn members_in_join_order(&self, id: Uuid) -> Result<Vec<MemberSeat>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, username, lobby_joined_at, lobby_joined_seq
             FROM users WHERE lobby_id = ?1
             ORDER BY lobby_joined_seq ASC",
        )?;

        let members = stmt
            .query_map(params![id.to_string()], |row| {
                Ok(MemberSeat {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    joined_at: parse_datetime(&row.get::<_, String>(2)?)?,
                    joined_seq: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(members)
    }

    /// The earliest-joined remaining member, the host election winner
    #[instrument(skip(self))]
    pub fn earliest_member(&self, id: Uuid) -> Result<Option<i64>> {
        let user_id = self
            .conn
            .query_row(
                "SELECT id FROM users WHERE lobby_id = ?1
                 ORDER BY lobby_joined_seq ASC LIMIT 1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(user_id)
    }

    /// Filtered, paginated listing ordered oldest-first.
    ///
    /// `include_hidden` distinguishes the administrative view from the
    /// public one; metadata filters are applied by the caller afterwards.
    #[instrument(skip(self, filter))]
    pub fn list(&self, filter: &LobbyFilter, include_hidden: bool) -> Result<Vec<Lobby>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if !include_hidden {
            clauses.push("is_hidden = 0".into());
        }
        if let Some(title) = &filter.title_contains {
            clauses.push("lower(title) LIKE ?".into());
            values.push(SqlValue::Text(format!("%{}%", title.to_lowercase())));
        }
        match filter.has_password {
            Some(true) => clauses.push("password_hash IS NOT NULL".into()),
            Some(false) => clauses.push("password_hash IS NULL".into()),
            None => {}
        }
        if let Some(locked) = filter.locked {
            clauses.push("is_locked = ?".into());
            values.push(SqlValue::Integer(locked as i64));
        }
        if let Some(min) = filter.min_capacity {
            clauses.push("max_users >= ?".into());
            values.push(SqlValue::Integer(min as i64));
        }
        if let Some(max) = filter.max_capacity {
            clauses.push("max_users <= ?".into());
            values.push(SqlValue::Integer(max as i64));
        }

        let mut sql = format!("SELECT {LOBBY_COLUMNS} FROM lobbies");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at ASC LIMIT ? OFFSET ?");
        values.push(SqlValue::Integer(
            filter.limit.map(i64::from).unwrap_or(-1),
        ));
        values.push(SqlValue::Integer(filter.offset as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let lobbies = stmt
            .query_map(params_from_iter(values.iter()), Self::row_to_lobby)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(lobbies)
    }

    /// Quick-join candidates: visible, unlocked, passwordless rooms,
    /// oldest first so older rooms fill before new ones are opened.
    #[instrument(skip(self))]
    pub fn quick_join_candidates(
        &self,
        max_users: Option<u32>,
        limit: u32,
    ) -> Result<Vec<Lobby>> {
        let base = format!(
            "SELECT {LOBBY_COLUMNS} FROM lobbies
             WHERE is_hidden = 0 AND is_locked = 0 AND password_hash IS NULL"
        );

        let lobbies = match max_users {
            Some(max) => {
                let mut stmt = self.conn.prepare(&format!(
                    "{base} AND max_users = ?1 ORDER BY created_at ASC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![max as i64, limit as i64], Self::row_to_lobby)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{base} ORDER BY created_at ASC LIMIT ?1"))?;
                let rows = stmt
                    .query_map(params![limit as i64], Self::row_to_lobby)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };

        Ok(lobbies)
    }

    /// Aggregate counts across all lobbies
    #[instrument(skip(self))]
    pub fn stats(&self) -> Result<LobbyStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(hostless), 0),
                    COALESCE(SUM(is_hidden), 0),
                    COALESCE(SUM(is_locked), 0),
                    COALESCE(SUM(CASE WHEN password_hash IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM lobbies",
            [],
            |row| {
                Ok(LobbyStats {
                    total: row.get::<_, i64>(0)? as u64,
                    hostless: row.get::<_, i64>(1)? as u64,
                    hidden: row.get::<_, i64>(2)? as u64,
                    locked: row.get::<_, i64>(3)? as u64,
                    passworded: row.get::<_, i64>(4)? as u64,
                })
            },
        )?;

        Ok(stats)
    }
}
