//! Greenroom Core Library
//!
//! Session layer for multiplayer game backends: lobby lifecycle,
//! single-seat membership, host election, quick-join matchmaking,
//! lifecycle hooks, and event fan-out.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod hooks;
pub mod invariants;
pub mod models;
pub mod password;
pub mod storage;

pub use config::EngineConfig;
pub use engine::{LobbyEngine, QuickJoinPrefs};
pub use error::{Error, Result};
pub use events::{EventBus, LobbyEvent};
pub use hooks::{HookOutcome, LobbyHooks, MemberAction, NoopHooks};
pub use models::*;
pub use storage::{Database, LobbyFilter, LobbyStats, LobbyStore, UserStore};
