//! Engine configuration
//!
//! Passed explicitly at construction; the engine reads no ambient
//! global state.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for before-hooks. A hook that misses it is aborted and
    /// the transition fails with a timeout, not a veto.
    pub hook_timeout: Duration,
    /// How many candidate rooms quick-join scans before opening a new
    /// one. A tunable, not a correctness bound.
    pub quick_join_candidates: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hook_timeout: Duration::from_secs(5),
            quick_join_candidates: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.hook_timeout, Duration::from_secs(5));
        assert_eq!(config.quick_join_candidates, 5);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"quick_join_candidates": 3}"#).unwrap();
        assert_eq!(config.quick_join_candidates, 3);
        assert_eq!(config.hook_timeout, Duration::from_secs(5));
    }
}
