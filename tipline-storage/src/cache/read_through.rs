//! Read-through access with optional stale-while-revalidate.
//!
//! [`ReadThroughCache`] wraps a [`Store`] and a caller-supplied
//! [`Producer`]. Cold reads (absent or expired) call the producer and cache
//! its result. Stale reads return the held value at once; with
//! stale-while-revalidate enabled a background task refreshes it.
//!
//! # Example
//!
//! ```ignore
//! let odds = ReadThroughCache::new(tiers.class(TierClass::Realtime)?);
//!
//! let read = odds
//!     .read_through(
//!         "odds:nba:lal-bos",
//!         ReadOptions::new().tag("odds").stale_while_revalidate(true),
//!         |key: String| async move { client.fetch_odds(&key).await },
//!     )
//!     .await?;
//!
//! if read.is_stale() {
//!     // render with an "updating" hint
//! }
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use tipline_core::{CacheError, FetchError, Tag, TierPolicy, TiplineResult};

use super::freshness::{CacheRead, Freshness};
use super::stats::CacheStats;
use super::store::{EntryOptions, Store};

/// Asynchronous data source for a cache key.
///
/// Implemented for any `Fn(String) -> impl Future<Output = Result<V, FetchError>>`,
/// so plain async closures can be passed to
/// [`ReadThroughCache::read_through`].
#[async_trait]
pub trait Producer<V>: Send + Sync + 'static {
    async fn produce(&self, key: &str) -> Result<V, FetchError>;
}

#[async_trait]
impl<V, F, Fut> Producer<V> for F
where
    V: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
{
    async fn produce(&self, key: &str) -> Result<V, FetchError> {
        (self)(key.to_string()).await
    }
}

/// Per-call options for [`ReadThroughCache::read_through`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// TTL for a produced value; `None` uses the tier default, or the
    /// refreshed entry's own TTL for a background refresh.
    pub ttl: Option<Duration>,
    /// Tags attached to a produced value. A background refresh adds these
    /// to the tags the refreshed entry already carries.
    pub tags: BTreeSet<Tag>,
    /// Serve stale values and refresh them in the background.
    pub stale_while_revalidate: bool,
    /// Staleness horizon override.
    pub stale_after: Option<Duration>,
    /// Skip the cache read and always call the producer.
    pub bypass: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<T: Into<Tag>>(mut self, tags: impl IntoIterator<Item = T>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    pub fn stale_after(mut self, horizon: Duration) -> Self {
        self.stale_after = Some(horizon);
        self
    }

    /// Force a producer call (e.g. a user-initiated refresh).
    pub fn bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    /// Staleness horizon for an entry with `ttl`: the explicit override,
    /// then the tier's horizon, then half the entry's TTL.
    pub fn horizon(&self, policy: &TierPolicy, ttl: Duration) -> Duration {
        self.stale_after
            .or(policy.stale_after)
            .unwrap_or(ttl / 2)
    }

    fn entry_options(&self) -> EntryOptions {
        EntryOptions {
            ttl: self.ttl,
            tags: self.tags.clone(),
        }
    }
}

/// Removes a key from the in-flight set when the refresh settles,
/// including when the refresh task panics or is dropped.
struct InFlightGuard {
    in_flight: Arc<DashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// A store handle with read-through semantics.
///
/// Cheap to clone; clones share the store and the in-flight refresh set.
pub struct ReadThroughCache<V> {
    store: Arc<Store<V>>,
    in_flight: Arc<DashSet<String>>,
}

impl<V> Clone for ReadThroughCache<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<V> From<Store<V>> for ReadThroughCache<V> {
    fn from(store: Store<V>) -> Self {
        Self::new(Arc::new(store))
    }
}

impl<V> ReadThroughCache<V> {
    pub fn new(store: Arc<Store<V>>) -> Self {
        Self {
            store,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<Store<V>> {
        &self.store
    }

    /// Whether a background refresh for `key` is running.
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.in_flight.contains(key)
    }

    /// Number of background refreshes currently running.
    pub fn refreshes_in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl<V> ReadThroughCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Read `key`, calling `producer` when the store cannot serve it.
    ///
    /// - fresh entry: returned, producer not called
    /// - stale entry: returned; with stale-while-revalidate a background
    ///   refresh is dispatched unless one is already running
    /// - absent or expired: producer called, result cached and returned
    /// - `bypass`: producer always called, result cached and returned
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ProducerFailed`] when the producer fails on a
    /// cold or bypassed read. Nothing is cached and any existing entry is
    /// left untouched.
    pub async fn read_through<P>(
        &self,
        key: &str,
        options: ReadOptions,
        producer: P,
    ) -> TiplineResult<CacheRead<V>>
    where
        P: Producer<V>,
    {
        if options.bypass {
            tracing::debug!(tier = %self.store.name(), key, "Bypassing cache read");
            return self.produce_and_store(key, &options, &producer).await;
        }

        let Some(read) = self.store.lookup(key) else {
            tracing::debug!(tier = %self.store.name(), key, "Cache miss, calling producer");
            return self.produce_and_store(key, &options, &producer).await;
        };

        let horizon = options.horizon(self.store.policy(), read.ttl());
        if read.age() < horizon {
            return Ok(read.with_freshness(Freshness::Fresh));
        }

        let read = read.with_freshness(Freshness::Stale);
        if !options.stale_while_revalidate {
            return Ok(read);
        }

        if self.schedule_refresh(key, &options, producer) {
            Ok(read.with_refresh_scheduled())
        } else {
            Ok(read)
        }
    }

    async fn produce_and_store<P>(
        &self,
        key: &str,
        options: &ReadOptions,
        producer: &P,
    ) -> TiplineResult<CacheRead<V>>
    where
        P: Producer<V>,
    {
        let value = producer
            .produce(key)
            .await
            .map_err(|source| CacheError::ProducerFailed {
                key: key.to_string(),
                source,
            })?;

        let ttl = options.ttl.unwrap_or(self.store.default_ttl());
        self.store.set(key, value.clone(), options.entry_options());
        Ok(CacheRead::from_producer(value, ttl))
    }

    /// Dispatch a background refresh of `key` unless one is in flight.
    ///
    /// Returns whether a refresh is running for the entry afterwards. The
    /// refresh only lands if the entry it was started for is still held
    /// when the producer returns.
    fn schedule_refresh<P>(&self, key: &str, options: &ReadOptions, producer: P) -> bool
    where
        P: Producer<V>,
    {
        if !self.in_flight.insert(key.to_string()) {
            tracing::trace!(tier = %self.store.name(), key, "Refresh already in flight");
            return true;
        }

        let Some(generation) = self.store.generation(key) else {
            // Removed between the read and the dispatch
            self.in_flight.remove(key);
            return false;
        };

        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.to_string(),
        };
        let store = Arc::clone(&self.store);
        let entry_options = options.entry_options();
        let key = key.to_string();

        tracing::debug!(tier = %store.name(), key = %key, "Dispatching background refresh");

        tokio::spawn(async move {
            let _guard = guard;
            match producer.produce(&key).await {
                Ok(value) => {
                    if store.set_if_current(&key, generation, value, entry_options) {
                        tracing::debug!(tier = %store.name(), key = %key, "Background refresh stored");
                    } else {
                        tracing::debug!(
                            tier = %store.name(),
                            key = %key,
                            "Entry changed during refresh, discarding result"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        tier = %store.name(),
                        key = %key,
                        error = %e,
                        "Background refresh failed, keeping stale entry"
                    );
                }
            }
        });
        true
    }

    // Store passthroughs

    pub fn get(&self, key: &str) -> Option<V> {
        self.store.get(key)
    }

    pub fn lookup(&self, key: &str) -> Option<CacheRead<V>> {
        self.store.lookup(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.store.has(key)
    }

    pub fn set(&self, key: impl Into<String>, value: V, options: EntryOptions) {
        self.store.set(key, value, options)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.delete(key)
    }

    pub fn clear(&self) {
        self.store.clear()
    }

    pub fn cleanup(&self) -> usize {
        self.store.cleanup()
    }

    pub fn invalidate_by_tags<S: AsRef<str>>(&self, tags: impl IntoIterator<Item = S>) -> usize {
        self.store.invalidate_by_tags(tags)
    }

    pub fn invalidate_by_pattern(&self, pattern: &str) -> TiplineResult<usize> {
        self.store.invalidate_by_pattern(pattern)
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }
}
