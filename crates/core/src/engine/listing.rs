//! Read-side queries: room listings and aggregate stats
//!
//! SQL handles the cheap predicates; metadata matching runs in memory on
//! the returned page. Hidden rooms are excluded from the public listing
//! and injected back per-caller when the caller is seated in one.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::invariants;
use crate::models::{Lobby, MemberSeat};
use crate::storage::{LobbyFilter, LobbyStats};

use super::LobbyEngine;

impl LobbyEngine {
    /// Public listing: hidden rooms excluded
    #[instrument(skip(self, filter))]
    pub fn list(&self, filter: &LobbyFilter) -> Result<Vec<Lobby>> {
        let lobbies = {
            let db = self.db();
            db.lobbies().list(filter, false)?
        };
        Ok(apply_metadata_filter(lobbies, &filter.metadata))
    }

    /// Listing for a specific caller: the public view, plus the caller's
    /// own room even when it is hidden.
    #[instrument(skip(self, filter))]
    pub fn list_for_user(&self, user_id: i64, filter: &LobbyFilter) -> Result<Vec<Lobby>> {
        let (lobbies, own) = {
            let db = self.db();
            let lobbies = db.lobbies().list(filter, false)?;
            let own = match db.users().current_lobby(user_id)? {
                Some(lobby_id) => db.lobbies().find_by_id(lobby_id)?,
                None => None,
            };
            (lobbies, own)
        };

        let mut lobbies = apply_metadata_filter(lobbies, &filter.metadata);
        if let Some(own) = own {
            // The caller's own room bypasses hiding, not the filters
            if own.is_hidden && filter_admits(&own, filter) && !lobbies.iter().any(|l| l.id == own.id)
            {
                // Keep the oldest-first ordering the store returned
                let at = lobbies
                    .iter()
                    .position(|l| l.created_at > own.created_at)
                    .unwrap_or(lobbies.len());
                lobbies.insert(at, own);
            }
        }
        Ok(lobbies)
    }

    /// Administrative listing: everything, hidden included
    #[instrument(skip(self, filter))]
    pub fn list_admin(&self, filter: &LobbyFilter) -> Result<Vec<Lobby>> {
        let lobbies = {
            let db = self.db();
            db.lobbies().list(filter, true)?
        };
        Ok(apply_metadata_filter(lobbies, &filter.metadata))
    }

    /// One lobby with its current members in join order
    #[instrument(skip(self))]
    pub fn lobby_detail(&self, lobby_id: Uuid) -> Result<(Lobby, Vec<MemberSeat>)> {
        let db = self.db();
        let lobby = db
            .lobbies()
            .find_by_id(lobby_id)?
            .ok_or_else(|| Error::NotFound(format!("lobby {lobby_id}")))?;
        let members = db.lobbies().members_in_join_order(lobby_id)?;
        invariants::assert_host_among_members(&lobby, &members);
        Ok((lobby, members))
    }

    /// Aggregate counts across all rooms
    #[instrument(skip(self))]
    pub fn stats(&self) -> Result<LobbyStats> {
        let db = self.db();
        db.lobbies().stats()
    }
}

/// The same predicates `LobbyStore::list` applies in SQL, evaluated in
/// memory for a row fetched outside the listing query
fn filter_admits(lobby: &Lobby, filter: &LobbyFilter) -> bool {
    if let Some(needle) = &filter.title_contains {
        if !lobby.title.to_lowercase().contains(&needle.to_lowercase()) {
            return false;
        }
    }
    if let Some(has_password) = filter.has_password {
        if lobby.has_password() != has_password {
            return false;
        }
    }
    if let Some(locked) = filter.locked {
        if lobby.is_locked != locked {
            return false;
        }
    }
    if let Some(min) = filter.min_capacity {
        if lobby.max_users < min {
            return false;
        }
    }
    if let Some(max) = filter.max_capacity {
        if lobby.max_users > max {
            return false;
        }
    }
    metadata_matches(&lobby.metadata, &filter.metadata)
}

fn apply_metadata_filter(
    lobbies: Vec<Lobby>,
    filter: &HashMap<String, Option<String>>,
) -> Vec<Lobby> {
    if filter.is_empty() {
        return lobbies;
    }
    lobbies
        .into_iter()
        .filter(|lobby| metadata_matches(&lobby.metadata, filter))
        .collect()
}

/// Every filter key must be present in the room's metadata. A filter
/// value is a case-insensitive substring test against the entry; a
/// `None` value tests presence only.
pub(super) fn metadata_matches(
    metadata: &Map<String, Value>,
    filter: &HashMap<String, Option<String>>,
) -> bool {
    filter.iter().all(|(key, needle)| {
        let Some(entry) = metadata.get(key) else {
            return false;
        };
        match needle {
            None => true,
            Some(needle) => {
                let haystack = match entry {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                haystack.to_lowercase().contains(&needle.to_lowercase())
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn filter(pairs: &[(&str, Option<&str>)]) -> HashMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_empty_filter_matches_anything() {
        assert!(metadata_matches(&Map::new(), &HashMap::new()));
        assert!(metadata_matches(
            &meta(&[("region", json!("eu"))]),
            &HashMap::new()
        ));
    }

    #[test]
    fn test_value_is_case_insensitive_substring() {
        let metadata = meta(&[("region", json!("EU-West"))]);
        assert!(metadata_matches(&metadata, &filter(&[("region", Some("eu"))])));
        assert!(metadata_matches(&metadata, &filter(&[("region", Some("west"))])));
        assert!(!metadata_matches(&metadata, &filter(&[("region", Some("us"))])));
    }

    #[test]
    fn test_none_value_tests_presence_only() {
        let metadata = meta(&[("ranked", json!(true))]);
        assert!(metadata_matches(&metadata, &filter(&[("ranked", None)])));
        assert!(!metadata_matches(&metadata, &filter(&[("casual", None)])));
    }

    #[test]
    fn test_missing_key_fails_even_with_value() {
        let metadata = meta(&[("region", json!("eu"))]);
        assert!(!metadata_matches(&metadata, &filter(&[("mode", Some("ffa"))])));
    }

    #[test]
    fn test_non_string_values_match_via_rendering() {
        let metadata = meta(&[("round_limit", json!(10))]);
        assert!(metadata_matches(
            &metadata,
            &filter(&[("round_limit", Some("10"))])
        ));
    }

    #[test]
    fn test_filter_admits_checks_every_predicate() {
        use crate::models::{Lobby, LobbyAttrs};

        let lobby = Lobby::new(
            &LobbyAttrs {
                title: "Night Arena".into(),
                max_users: 8,
                ..Default::default()
            },
            None,
        );

        assert!(filter_admits(&lobby, &LobbyFilter::default()));
        assert!(filter_admits(
            &lobby,
            &LobbyFilter {
                title_contains: Some("arena".into()),
                ..Default::default()
            }
        ));
        assert!(!filter_admits(
            &lobby,
            &LobbyFilter {
                title_contains: Some("dungeon".into()),
                ..Default::default()
            }
        ));
        assert!(!filter_admits(
            &lobby,
            &LobbyFilter {
                has_password: Some(true),
                ..Default::default()
            }
        ));
        assert!(!filter_admits(
            &lobby,
            &LobbyFilter {
                min_capacity: Some(10),
                ..Default::default()
            }
        ));
    }

    #[test]
    fn test_all_keys_must_match() {
        let metadata = meta(&[("region", json!("eu")), ("mode", json!("ffa"))]);
        assert!(metadata_matches(
            &metadata,
            &filter(&[("region", Some("eu")), ("mode", Some("ffa"))])
        ));
        assert!(!metadata_matches(
            &metadata,
            &filter(&[("region", Some("eu")), ("mode", Some("tdm"))])
        ));
    }
}
