//! TIPLINE Core - Shared Cache Types
//!
//! Plain data structures shared by the cache layer and its consumers:
//! group tags, error enums, and the tier/persistence configuration.
//! This crate contains no cache behaviour.

pub mod config;
pub mod duration_ms;
pub mod error;
pub mod tiers;

pub use config::{
    CacheConfig, EvictionOrder, MaintenanceConfig, PersistenceConfig, PersistencePolicy,
    TierPolicy,
};
pub use error::{
    CacheError, ConfigError, FetchError, PersistenceError, TiplineError, TiplineResult,
};
pub use tiers::{TierClass, DEFAULT_TIERS};

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

// ============================================================================
// KEYS AND TAGS
// ============================================================================

/// Cache keys are plain strings, e.g. `"signals:nba:2026-10-19"`.
pub type CacheKey = String;

/// Semantic group label attached to cache entries.
///
/// Tags let callers drop every entry belonging to a group (a league, a
/// user, an admin-edited module) without knowing the individual keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Create a tag from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The tag name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the tag and return the owned name.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Tag {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&String> for Tag {
    fn from(name: &String) -> Self {
        Self(name.clone())
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_tag_conversions() {
        let a = Tag::from("odds");
        let b = Tag::from("odds".to_string());
        let c = Tag::new(String::from("odds"));
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_str(), "odds");
        assert_eq!(a.to_string(), "odds");
        assert_eq!(c.into_inner(), "odds");
    }

    #[test]
    fn test_tag_borrow_lookup() {
        let mut tags = BTreeSet::new();
        tags.insert(Tag::from("league:nba"));
        assert!(tags.contains("league:nba"));
        assert!(!tags.contains("league:nfl"));
    }

    #[test]
    fn test_tag_serializes_as_plain_string() {
        let json = serde_json::to_string(&Tag::from("user:42")).unwrap();
        assert_eq!(json, "\"user:42\"");
        let back: Tag = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), "user:42");
    }
}
