//! Error types for Greenroom Core

use thiserror::Error;

/// Every lobby operation failure a caller can act on, plus the opaque
/// infrastructure passthroughs. All variants are returned as values,
/// never raised.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("user is already in a lobby")]
    AlreadyInLobby,

    #[error("user is not in a lobby")]
    NotInLobby,

    #[error("lobby is full")]
    Full,

    #[error("lobby is locked")]
    Locked,

    #[error("lobby requires a password")]
    PasswordRequired,

    #[error("invalid password")]
    InvalidPassword,

    #[error("caller is not the lobby host")]
    NotHost,

    #[error("host cannot kick themself")]
    CannotKickSelf,

    #[error("capacity {requested} is below current occupancy {current}")]
    TooSmall { requested: u32, current: u32 },

    #[error("hook rejected the transition: {0}")]
    HookRejected(String),

    #[error("hook exceeded its deadline")]
    HookTimeout,

    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

pub type Result<T> = std::result::Result<T, Error>;
