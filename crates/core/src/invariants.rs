//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use crate::models::{Lobby, MemberSeat, MAX_CAPACITY, MAX_TITLE_LEN};

/// Validate that a lobby's own fields are internally consistent
pub fn assert_lobby_invariants(lobby: &Lobby) {
    debug_assert!(
        !lobby.title.trim().is_empty(),
        "Lobby {} has empty title",
        lobby.id
    );

    debug_assert!(
        lobby.title.chars().count() <= MAX_TITLE_LEN,
        "Lobby {} title exceeds {} chars",
        lobby.id,
        MAX_TITLE_LEN
    );

    debug_assert!(
        lobby.max_users >= 1 && lobby.max_users <= MAX_CAPACITY,
        "Lobby {} has capacity {} outside 1..={}",
        lobby.id,
        lobby.max_users,
        MAX_CAPACITY
    );

    // Hostless rooms never name an authority
    debug_assert!(
        !(lobby.hostless && lobby.host_id.is_some()),
        "Hostless lobby {} names host {:?}",
        lobby.id,
        lobby.host_id
    );
}

/// A non-hostless lobby with members must have a host, and that host
/// must be one of the members
pub fn assert_host_among_members(lobby: &Lobby, members: &[MemberSeat]) {
    if lobby.hostless || members.is_empty() {
        return;
    }

    match lobby.host_id {
        Some(host_id) => debug_assert!(
            members.iter().any(|m| m.user_id == host_id),
            "Lobby {} host {} is not a member",
            lobby.id,
            host_id
        ),
        None => debug_assert!(
            false,
            "Lobby {} has {} members but no host",
            lobby.id,
            members.len()
        ),
    }
}

/// Occupancy may never exceed capacity
pub fn assert_capacity_respected(lobby: &Lobby, member_count: u32) {
    debug_assert!(
        member_count <= lobby.max_users,
        "Lobby {} holds {} members over capacity {}",
        lobby.id,
        member_count,
        lobby.max_users
    );
}
