//! Data models for Greenroom

mod lobby;
mod user;

pub use lobby::*;
pub use user::*;
