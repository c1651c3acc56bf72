//! Cache entries with TTL tracking.

use std::collections::BTreeSet;
use std::time::Duration;

use tipline_core::Tag;
use tokio::time::Instant;

use super::freshness::Freshness;

/// Upper bound used when `created_at + ttl` does not fit in an `Instant`.
const MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 10);

/// A cached value with its lifetime and group tags.
///
/// `expires_at` is always `created_at + ttl`; both are fixed at
/// construction. Timestamps use `tokio::time::Instant` so a paused test
/// runtime can move time forward deterministically.
#[derive(Debug, Clone)]
pub struct Entry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    expires_at: Instant,
    tags: BTreeSet<Tag>,
}

impl<V> Entry<V> {
    /// Create an entry that starts its lifetime now.
    pub fn new(value: V, ttl: Duration, tags: BTreeSet<Tag>) -> Self {
        Self::with_created_at(value, Instant::now(), ttl, tags)
    }

    /// Create an entry with an explicit creation instant.
    ///
    /// Used when restoring persisted entries, whose lifetime began in an
    /// earlier process.
    pub fn with_created_at(
        value: V,
        created_at: Instant,
        ttl: Duration,
        tags: BTreeSet<Tag>,
    ) -> Self {
        let ttl = ttl.min(MAX_TTL);
        let expires_at = created_at
            .checked_add(ttl)
            .unwrap_or_else(|| created_at + MAX_TTL);
        Self {
            value,
            created_at,
            ttl,
            expires_at,
            tags,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// An entry is expired from the instant `expires_at` is reached.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Time since creation (zero if `now` precedes creation).
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Lifetime left before expiration (zero once expired).
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Classify the entry against a staleness horizon.
    ///
    /// With no horizon an entry is either fresh or expired.
    pub fn freshness_at(&self, now: Instant, stale_after: Option<Duration>) -> Freshness {
        if self.is_expired_at(now) {
            Freshness::Expired
        } else if stale_after.is_some_and(|horizon| self.age_at(now) >= horizon) {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> BTreeSet<Tag> {
        names.iter().map(|n| Tag::from(*n)).collect()
    }

    #[test]
    fn test_expires_at_is_created_plus_ttl() {
        let entry = Entry::new(1u32, Duration::from_secs(30), BTreeSet::new());
        assert_eq!(entry.expires_at(), entry.created_at() + Duration::from_secs(30));
        assert_eq!(entry.ttl(), Duration::from_secs(30));
    }

    #[test]
    fn test_expiry_boundary() {
        let created = Instant::now();
        let entry = Entry::with_created_at("v", created, Duration::from_secs(10), BTreeSet::new());

        assert!(!entry.is_expired_at(created));
        assert!(!entry.is_expired_at(created + Duration::from_millis(9_999)));
        assert!(entry.is_expired_at(created + Duration::from_secs(10)));
        assert_eq!(entry.remaining_at(created + Duration::from_secs(4)), Duration::from_secs(6));
        assert_eq!(entry.remaining_at(created + Duration::from_secs(40)), Duration::ZERO);
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let created = Instant::now();
        let entry = Entry::with_created_at("v", created, Duration::ZERO, BTreeSet::new());
        assert!(entry.is_expired_at(created));
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let entry = Entry::new("v", Duration::MAX, BTreeSet::new());
        assert_eq!(entry.ttl(), MAX_TTL);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_freshness_classification() {
        let created = Instant::now();
        let entry = Entry::with_created_at("v", created, Duration::from_secs(30), BTreeSet::new());
        let horizon = Some(Duration::from_secs(10));

        assert_eq!(entry.freshness_at(created, horizon), Freshness::Fresh);
        assert_eq!(
            entry.freshness_at(created + Duration::from_secs(10), horizon),
            Freshness::Stale
        );
        assert_eq!(
            entry.freshness_at(created + Duration::from_secs(30), horizon),
            Freshness::Expired
        );
        assert_eq!(
            entry.freshness_at(created + Duration::from_secs(20), None),
            Freshness::Fresh
        );
    }

    #[test]
    fn test_tags() {
        let entry = Entry::new(0u8, Duration::from_secs(1), tags(&["league:nba", "odds"]));
        assert!(entry.has_tag("odds"));
        assert!(!entry.has_tag("user:1"));
        assert_eq!(entry.tags().len(), 2);
    }
}
