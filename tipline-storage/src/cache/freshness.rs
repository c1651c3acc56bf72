//! Freshness classification and read results.
//!
//! Reads return [`CacheRead<T>`], which carries how old the value is and
//! where it came from, so callers that care (e.g. a live odds panel) can
//! show an "updating" hint when they are served a stale value.

use std::time::Duration;

/// Freshness of a held entry relative to its staleness horizon and TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Younger than the staleness horizon.
    Fresh,
    /// Past the staleness horizon but before expiry; still servable,
    /// eligible for a background refresh.
    Stale,
    /// Past `expires_at`; never served.
    Expired,
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }

    /// Whether a value in this state may be returned to a caller.
    pub fn is_servable(&self) -> bool {
        !self.is_expired()
    }
}

/// Where a read's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOrigin {
    /// Served from the store.
    Cache,
    /// Produced by the data source during this call.
    Producer,
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    origin: ReadOrigin,
    freshness: Freshness,
    /// Age of the value at the time of the read.
    age: Duration,
    /// TTL the value was stored with.
    ttl: Duration,
    /// A background refresh was dispatched (or already running) for this key.
    refresh_scheduled: bool,
}

impl<T> CacheRead<T> {
    /// Create a read served from the store.
    pub fn from_cache(value: T, age: Duration, ttl: Duration, freshness: Freshness) -> Self {
        Self {
            value,
            origin: ReadOrigin::Cache,
            freshness,
            age,
            ttl,
            refresh_scheduled: false,
        }
    }

    /// Create a read for a value the producer just returned.
    pub fn from_producer(value: T, ttl: Duration) -> Self {
        Self {
            value,
            origin: ReadOrigin::Producer,
            freshness: Freshness::Fresh,
            age: Duration::ZERO,
            ttl,
            refresh_scheduled: false,
        }
    }

    pub(crate) fn with_freshness(mut self, freshness: Freshness) -> Self {
        self.freshness = freshness;
        self
    }

    pub(crate) fn with_refresh_scheduled(mut self) -> Self {
        self.refresh_scheduled = true;
        self
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn origin(&self) -> ReadOrigin {
        self.origin
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    /// How old the value was when it was read.
    pub fn age(&self) -> Duration {
        self.age
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Lifetime the value had left when it was read.
    pub fn remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.age)
    }

    pub fn was_cache_hit(&self) -> bool {
        self.origin == ReadOrigin::Cache
    }

    pub fn was_cache_miss(&self) -> bool {
        self.origin == ReadOrigin::Producer
    }

    pub fn is_stale(&self) -> bool {
        self.freshness.is_stale()
    }

    pub fn refresh_scheduled(&self) -> bool {
        self.refresh_scheduled
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            origin: self.origin,
            freshness: self.freshness,
            age: self.age,
            ttl: self.ttl,
            refresh_scheduled: self.refresh_scheduled,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

impl<T> AsMut<T> for CacheRead<T> {
    fn as_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freshness_predicates() {
        assert!(Freshness::Fresh.is_fresh());
        assert!(Freshness::Fresh.is_servable());
        assert!(Freshness::Stale.is_stale());
        assert!(Freshness::Stale.is_servable());
        assert!(Freshness::Expired.is_expired());
        assert!(!Freshness::Expired.is_servable());
    }

    #[test]
    fn test_cache_read_from_cache() {
        let read = CacheRead::from_cache(
            "odds".to_string(),
            Duration::from_secs(12),
            Duration::from_secs(30),
            Freshness::Stale,
        );

        assert!(read.was_cache_hit());
        assert!(!read.was_cache_miss());
        assert!(read.is_stale());
        assert!(!read.refresh_scheduled());
        assert_eq!(read.remaining(), Duration::from_secs(18));
        assert_eq!(read.value(), "odds");
    }

    #[test]
    fn test_cache_read_from_producer() {
        let read = CacheRead::from_producer(42i32, Duration::from_secs(5));

        assert!(read.was_cache_miss());
        assert_eq!(read.origin(), ReadOrigin::Producer);
        assert_eq!(read.freshness(), Freshness::Fresh);
        assert_eq!(read.age(), Duration::ZERO);
        assert_eq!(read.into_value(), 42);
    }

    #[test]
    fn test_cache_read_map_keeps_metadata() {
        let read = CacheRead::from_cache(7u8, Duration::from_secs(1), Duration::from_secs(2), Freshness::Fresh)
            .with_refresh_scheduled();
        let mapped = read.map(|v| v.to_string());

        assert!(mapped.refresh_scheduled());
        assert!(mapped.was_cache_hit());
        assert_eq!(mapped.into_value(), "7");
    }
}
