//! Lobby engine - lifecycle transitions, host election, matchmaking
//!
//! Orchestrates the store, the hook runner, and the event bus. Every
//! externally-triggered operation may run concurrently with any other;
//! correctness rests on transactional atomicity plus re-validation of
//! the membership guards inside each transaction. The database lock is
//! never held across an await, so hooks can take their full deadline
//! without stalling unrelated operations.

mod listing;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, LobbyEvent};
use crate::hooks::{HookRunner, LobbyHooks, MemberAction};
use crate::invariants;
use crate::models::{Lobby, LobbyAttrs, LobbyUpdate, MAX_CAPACITY, MAX_TITLE_LEN};
use crate::password::{hash_password, verify_password};
use crate::storage::{Database, LobbyStore, UserStore};

use listing::metadata_matches;

/// Matchmaking preferences for quick-join
#[derive(Debug, Clone, Default)]
pub struct QuickJoinPrefs {
    /// Title for the fallback room; generated when absent
    pub title: Option<String>,
    /// When set, candidates must match this capacity exactly and the
    /// fallback room is created with it
    pub max_users: Option<u32>,
    /// Candidate metadata filter: key presence plus case-insensitive
    /// value substring
    pub metadata: HashMap<String, Option<String>>,
}

/// What a leave transaction did, decided inside the transaction and
/// announced after commit
enum LeaveAftermath {
    Deleted,
    HostChanged(i64),
    Left,
}

/// The session-layer core: lobby CRUD, membership transitions, host
/// election, and quick-join matchmaking
pub struct LobbyEngine {
    db: Arc<Mutex<Database>>,
    hooks: HookRunner,
    events: EventBus,
    config: EngineConfig,
}

impl LobbyEngine {
    pub fn new(db: Database, hooks: Arc<dyn LobbyHooks>, config: EngineConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            hooks: HookRunner::new(hooks, config.hook_timeout),
            events: EventBus::new(),
            config,
        }
    }

    /// Event bus handle for subscribers
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Shared handle to the backing store. The identity layer owns user
    /// rows and shares this database.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        Arc::clone(&self.db)
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a lobby, optionally binding the creator as host and first
    /// member in the same atomic unit.
    #[instrument(skip(self, attrs), fields(title = %attrs.title))]
    pub async fn create(&self, attrs: LobbyAttrs, creator: Option<i64>) -> Result<Lobby> {
        validate_title(&attrs.title)?;
        validate_capacity(attrs.max_users)?;

        let attrs = self.hooks.before_create(attrs).await?;
        // The hook may have transformed the attributes
        validate_title(&attrs.title)?;
        validate_capacity(attrs.max_users)?;

        let password_hash = match attrs.password.as_deref() {
            Some(plaintext) => Some(hash_password(plaintext)?),
            None => None,
        };

        let mut lobby = Lobby::new(&attrs, password_hash);

        {
            let mut db = self.db();
            let tx = db.transaction()?;
            {
                let lobbies = LobbyStore::new(&tx);
                let users = UserStore::new(&tx);

                if lobbies.find_by_title(&lobby.title)?.is_some() {
                    return Err(Error::Validation(format!(
                        "title {:?} is already taken",
                        lobby.title
                    )));
                }

                match creator {
                    Some(user_id) => {
                        let user = users
                            .find_by_id(user_id)?
                            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;

                        // A creator already seated elsewhere keeps their
                        // seat; the room is created without them.
                        if !user.is_seated() {
                            if !lobby.hostless {
                                lobby.host_id = Some(user_id);
                            }
                            invariants::assert_lobby_invariants(&lobby);
                            lobbies
                                .create(&lobby)
                                .map_err(|e| map_title_conflict(e, &lobby.title))?;
                            users.seat(user_id, lobby.id)?;
                        } else {
                            invariants::assert_lobby_invariants(&lobby);
                            lobbies
                                .create(&lobby)
                                .map_err(|e| map_title_conflict(e, &lobby.title))?;
                        }
                    }
                    None => {
                        invariants::assert_lobby_invariants(&lobby);
                        lobbies
                            .create(&lobby)
                            .map_err(|e| map_title_conflict(e, &lobby.title))?;
                    }
                }
            }
            tx.commit()?;
        }

        info!(lobby_id = %lobby.id, "lobby created");
        self.events
            .publish_global(LobbyEvent::LobbyCreated(lobby.clone()));
        self.hooks.after_create(lobby.clone());

        Ok(lobby)
    }

    /// Join a lobby. Guards run in order: seat, capacity, lock, hook,
    /// password. Seat and capacity are re-validated inside the
    /// transaction before the membership write.
    #[instrument(skip(self, password))]
    pub async fn join(
        &self,
        user_id: i64,
        lobby_id: Uuid,
        password: Option<&str>,
    ) -> Result<Lobby> {
        let lobby = {
            let db = self.db();
            let lobbies = db.lobbies();
            let users = db.users();

            let user = users
                .find_by_id(user_id)?
                .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
            if user.is_seated() {
                return Err(Error::AlreadyInLobby);
            }

            let lobby = lobbies
                .find_by_id(lobby_id)?
                .ok_or_else(|| Error::NotFound(format!("lobby {lobby_id}")))?;
            if lobbies.member_count(lobby_id)? >= lobby.max_users {
                return Err(Error::Full);
            }
            if lobby.is_locked {
                return Err(Error::Locked);
            }
            lobby
        };

        let action = self
            .hooks
            .before_join(MemberAction { lobby_id, user_id })
            .await?;

        // The hook may redirect the join; the gate belongs to the room
        // actually being entered.
        let lobby = if action.lobby_id == lobby.id {
            lobby
        } else {
            let db = self.db();
            db.lobbies()
                .find_by_id(action.lobby_id)?
                .ok_or_else(|| Error::NotFound(format!("lobby {}", action.lobby_id)))?
        };

        match (lobby.password_hash.as_deref(), password) {
            (Some(_), None) => return Err(Error::PasswordRequired),
            (Some(hash), Some(given)) => {
                if !verify_password(given, hash)? {
                    return Err(Error::InvalidPassword);
                }
            }
            (None, _) => {}
        }

        let (lobby, promoted) = {
            let mut db = self.db();
            let tx = db.transaction()?;
            let result = {
                let lobbies = LobbyStore::new(&tx);
                let users = UserStore::new(&tx);

                // Re-validate under the write lock: the seat, the lock
                // flag, and the occupancy may all have changed while the
                // hook ran.
                if users.current_lobby(action.user_id)?.is_some() {
                    return Err(Error::AlreadyInLobby);
                }
                let mut current = lobbies
                    .find_by_id(action.lobby_id)?
                    .ok_or_else(|| Error::NotFound(format!("lobby {}", action.lobby_id)))?;
                if current.is_locked {
                    return Err(Error::Locked);
                }
                if lobbies.member_count(action.lobby_id)? >= current.max_users {
                    return Err(Error::Full);
                }

                users.seat(action.user_id, action.lobby_id)?;

                // First member of a room created without a creator
                // assumes authority, keeping the host invariant intact.
                let mut promoted = None;
                if !current.hostless && current.host_id.is_none() {
                    current.host_id = Some(action.user_id);
                    current.updated_at = Utc::now();
                    lobbies.update(&current)?;
                    promoted = Some(action.user_id);
                }

                (current, promoted)
            };
            tx.commit()?;
            result
        };

        self.events.publish_lobby(
            lobby.id,
            LobbyEvent::UserJoined {
                lobby_id: lobby.id,
                user_id: action.user_id,
            },
        );
        if let Some(new_host_id) = promoted {
            self.events.publish_lobby(
                lobby.id,
                LobbyEvent::HostChanged {
                    lobby_id: lobby.id,
                    new_host_id,
                },
            );
        }
        self.events
            .publish_global(LobbyEvent::LobbyMembershipChanged(lobby.id));
        self.hooks.after_join(action);

        Ok(lobby)
    }

    /// Leave the current lobby. Membership clear, host election, and
    /// empty-room deletion are one atomic unit.
    #[instrument(skip(self))]
    pub async fn leave(&self, user_id: i64) -> Result<()> {
        let lobby_id = {
            let db = self.db();
            db.users().current_lobby(user_id)?.ok_or(Error::NotInLobby)?
        };

        let action = self
            .hooks
            .before_leave(MemberAction { lobby_id, user_id })
            .await?;

        let (aftermath, lobby_id) = {
            let mut db = self.db();
            let tx = db.transaction()?;
            let result = {
                let lobbies = LobbyStore::new(&tx);
                let users = UserStore::new(&tx);

                // The seat may have moved while the hook ran
                let seated_in = users
                    .current_lobby(action.user_id)?
                    .ok_or(Error::NotInLobby)?;
                let lobby = lobbies
                    .find_by_id(seated_in)?
                    .ok_or_else(|| Error::NotFound(format!("lobby {seated_in}")))?;

                users.unseat(action.user_id)?;
                let remaining = lobbies.member_count(lobby.id)?;

                if remaining == 0 && !lobby.hostless {
                    lobbies.delete(lobby.id)?;
                    (LeaveAftermath::Deleted, lobby.id)
                } else if !lobby.hostless && lobby.host_id == Some(action.user_id) {
                    match lobbies.earliest_member(lobby.id)? {
                        Some(next_host) => {
                            let mut updated = lobby.clone();
                            updated.host_id = Some(next_host);
                            updated.updated_at = Utc::now();
                            lobbies.update(&updated)?;
                            (LeaveAftermath::HostChanged(next_host), lobby.id)
                        }
                        // Unreachable while remaining > 0, but deleting
                        // beats electing a vacant host.
                        None => {
                            lobbies.delete(lobby.id)?;
                            (LeaveAftermath::Deleted, lobby.id)
                        }
                    }
                } else {
                    (LeaveAftermath::Left, lobby.id)
                }
            };
            tx.commit()?;
            result
        };

        match aftermath {
            LeaveAftermath::Deleted => {
                info!(%lobby_id, "last member left, lobby deleted");
                self.events
                    .publish_global(LobbyEvent::LobbyDeleted(lobby_id));
                self.events.drop_topic(lobby_id);
            }
            LeaveAftermath::HostChanged(new_host_id) => {
                info!(%lobby_id, new_host_id, "host left, elected replacement");
                self.events.publish_lobby(
                    lobby_id,
                    LobbyEvent::UserLeft {
                        lobby_id,
                        user_id: action.user_id,
                    },
                );
                self.events.publish_lobby(
                    lobby_id,
                    LobbyEvent::HostChanged {
                        lobby_id,
                        new_host_id,
                    },
                );
                self.events
                    .publish_global(LobbyEvent::LobbyMembershipChanged(lobby_id));
            }
            LeaveAftermath::Left => {
                self.events.publish_lobby(
                    lobby_id,
                    LobbyEvent::UserLeft {
                        lobby_id,
                        user_id: action.user_id,
                    },
                );
                self.events
                    .publish_global(LobbyEvent::LobbyMembershipChanged(lobby_id));
            }
        }

        self.hooks.after_leave(action);
        Ok(())
    }

    /// Remove another member. Requires host authority unless the lobby
    /// is hostless.
    #[instrument(skip(self))]
    pub async fn kick(&self, actor_id: i64, lobby_id: Uuid, target_id: i64) -> Result<()> {
        {
            let db = self.db();
            let lobby = db
                .lobbies()
                .find_by_id(lobby_id)?
                .ok_or_else(|| Error::NotFound(format!("lobby {lobby_id}")))?;

            authorize_room_edit(&lobby, actor_id, &db.users())?;
            if actor_id == target_id {
                return Err(Error::CannotKickSelf);
            }
            if db.users().current_lobby(target_id)? != Some(lobby_id) {
                return Err(Error::NotInLobby);
            }
        }

        let action = self
            .hooks
            .before_kick(MemberAction {
                lobby_id,
                user_id: target_id,
            })
            .await?;

        {
            let mut db = self.db();
            let tx = db.transaction()?;
            {
                let lobbies = LobbyStore::new(&tx);
                let users = UserStore::new(&tx);
                let lobby = lobbies
                    .find_by_id(action.lobby_id)?
                    .ok_or_else(|| Error::NotFound(format!("lobby {}", action.lobby_id)))?;
                // The actor's own standing may have changed while the
                // hook ran
                authorize_room_edit(&lobby, actor_id, &users)?;
                if users.current_lobby(action.user_id)? != Some(action.lobby_id) {
                    return Err(Error::NotInLobby);
                }
                users.unseat(action.user_id)?;
            }
            tx.commit()?;
        }

        info!(%lobby_id, target_id = action.user_id, "member kicked");
        self.events.publish_lobby(
            action.lobby_id,
            LobbyEvent::UserKicked {
                lobby_id: action.lobby_id,
                user_id: action.user_id,
            },
        );
        self.events
            .publish_global(LobbyEvent::LobbyMembershipChanged(action.lobby_id));
        self.hooks.after_kick(action);

        Ok(())
    }

    /// Change lobby settings. Same authorization as kick. The
    /// before-update hook may rewrite the attribute map; a malformed
    /// rewrite is logged and the caller's attrs win.
    #[instrument(skip(self, update))]
    pub async fn update(
        &self,
        actor_id: i64,
        lobby_id: Uuid,
        update: LobbyUpdate,
    ) -> Result<Lobby> {
        {
            let db = self.db();
            let lobby = db
                .lobbies()
                .find_by_id(lobby_id)?
                .ok_or_else(|| Error::NotFound(format!("lobby {lobby_id}")))?;
            authorize_room_edit(&lobby, actor_id, &db.users())?;
        }

        let original = update.clone();
        let payload = serde_json::to_value(&update)?;
        let returned = self.hooks.before_update(payload).await?;
        let update = match serde_json::from_value::<LobbyUpdate>(returned) {
            Ok(rewritten) => rewritten,
            Err(err) => {
                warn!(%lobby_id, error = %err,
                    "before-update hook returned a malformed attribute map, using caller attrs");
                original
            }
        };

        if let Some(title) = update.title.as_deref() {
            validate_title(title)?;
        }
        if let Some(max) = update.max_users {
            validate_capacity(max)?;
        }
        let new_hash = match update.password.as_deref() {
            Some(plaintext) => Some(hash_password(plaintext)?),
            None => None,
        };

        let lobby = {
            let mut db = self.db();
            let tx = db.transaction()?;
            let lobby = {
                let lobbies = LobbyStore::new(&tx);
                let users = UserStore::new(&tx);

                let mut current = lobbies
                    .find_by_id(lobby_id)?
                    .ok_or_else(|| Error::NotFound(format!("lobby {lobby_id}")))?;
                authorize_room_edit(&current, actor_id, &users)?;

                if let Some(max) = update.max_users {
                    let occupancy = lobbies.member_count(lobby_id)?;
                    if max < occupancy {
                        return Err(Error::TooSmall {
                            requested: max,
                            current: occupancy,
                        });
                    }
                    current.max_users = max;
                }

                if let Some(title) = update.title {
                    let title = title.trim().to_string();
                    if let Some(existing) = lobbies.find_by_title(&title)? {
                        if existing.id != current.id {
                            return Err(Error::Validation(format!(
                                "title {title:?} is already taken"
                            )));
                        }
                    }
                    current.title = title;
                }

                if let Some(hidden) = update.is_hidden {
                    current.is_hidden = hidden;
                }
                if let Some(locked) = update.is_locked {
                    current.is_locked = locked;
                }
                if let Some(hash) = new_hash {
                    current.password_hash = Some(hash);
                } else if update.clear_password {
                    current.password_hash = None;
                }
                if let Some(metadata) = update.metadata {
                    current.metadata = metadata;
                }

                current.updated_at = Utc::now();
                invariants::assert_lobby_invariants(&current);
                lobbies
                    .update(&current)
                    .map_err(|e| map_title_conflict(e, &current.title))?;
                current
            };
            tx.commit()?;
            lobby
        };

        info!(lobby_id = %lobby.id, "lobby settings updated");
        self.events
            .publish_lobby(lobby.id, LobbyEvent::LobbyUpdated(lobby.clone()));
        self.events
            .publish_global(LobbyEvent::LobbyUpdated(lobby.clone()));
        self.hooks.after_update(lobby.clone());

        Ok(lobby)
    }

    /// Explicitly destroy a lobby, clearing every member's seat
    #[instrument(skip(self))]
    pub async fn delete(&self, lobby_id: Uuid) -> Result<()> {
        {
            let db = self.db();
            if db.lobbies().find_by_id(lobby_id)?.is_none() {
                return Err(Error::NotFound(format!("lobby {lobby_id}")));
            }
        }

        let lobby_id = self.hooks.before_delete(lobby_id).await?;

        {
            let mut db = self.db();
            let tx = db.transaction()?;
            {
                let lobbies = LobbyStore::new(&tx);
                let users = UserStore::new(&tx);
                users.unseat_all(lobby_id)?;
                lobbies.delete(lobby_id)?;
            }
            tx.commit()?;
        }

        info!(%lobby_id, "lobby deleted");
        self.events
            .publish_global(LobbyEvent::LobbyDeleted(lobby_id));
        self.events.drop_topic(lobby_id);
        self.hooks.after_delete(lobby_id);

        Ok(())
    }

    /// Matchmaking shortcut: fill the oldest compatible room, or open a
    /// new one with the caller hosting.
    #[instrument(skip(self, prefs))]
    pub async fn quick_join(&self, user_id: i64, prefs: QuickJoinPrefs) -> Result<Lobby> {
        let candidates = {
            let db = self.db();
            if db.users().current_lobby(user_id)?.is_some() {
                return Err(Error::AlreadyInLobby);
            }
            db.lobbies()
                .quick_join_candidates(prefs.max_users, self.config.quick_join_candidates)?
        };

        for candidate in candidates {
            if !metadata_matches(&candidate.metadata, &prefs.metadata) {
                continue;
            }
            match self.join(user_id, candidate.id, None).await {
                Ok(lobby) => return Ok(lobby),
                // Lost the capacity race to a concurrent joiner; the
                // next-oldest candidate gets a chance.
                Err(Error::Full) => continue,
                Err(other) => return Err(other),
            }
        }

        let mut metadata = Map::new();
        for (key, value) in &prefs.metadata {
            if let Some(value) = value {
                metadata.insert(key.clone(), Value::String(value.clone()));
            }
        }

        let attrs = LobbyAttrs {
            title: prefs
                .title
                .unwrap_or_else(|| format!("lobby-{}", Uuid::new_v4())),
            max_users: prefs.max_users.unwrap_or(crate::models::DEFAULT_CAPACITY),
            metadata,
            ..Default::default()
        };

        info!(user_id, "no quick-join candidate fit, opening a new lobby");
        self.create(attrs, Some(user_id)).await
    }
}

/// Kick and settings changes take the host's authority; in a hostless
/// room any member holds it, but only a member.
fn authorize_room_edit(lobby: &Lobby, actor_id: i64, users: &UserStore<'_>) -> Result<()> {
    if lobby.hostless {
        if users.current_lobby(actor_id)? != Some(lobby.id) {
            return Err(Error::NotHost);
        }
    } else if lobby.host_id != Some(actor_id) {
        return Err(Error::NotHost);
    }
    Ok(())
}

/// A concurrent create can commit between the duplicate-title check and
/// the insert; surface the UNIQUE violation the same way the check does.
fn map_title_conflict(err: Error, title: &str) -> Error {
    match err {
        Error::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Validation(format!("title {title:?} is already taken"))
        }
        other => other,
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::Validation("title must not be empty".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::Validation(format!(
            "title exceeds {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_capacity(max_users: u32) -> Result<()> {
    if max_users == 0 || max_users > MAX_CAPACITY {
        return Err(Error::Validation(format!(
            "capacity must be between 1 and {MAX_CAPACITY}"
        )));
    }
    Ok(())
}
