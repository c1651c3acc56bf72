//! Bounded, tag-indexed in-process store.
//!
//! # Expiration
//!
//! Entries expire lazily: `get`/`has`/`lookup` delete an expired entry on
//! first access. The only full scan is [`Store::cleanup`], which the
//! maintenance task runs on a timer.
//!
//! # Eviction
//!
//! Inserts always succeed. If the insert pushes the store over capacity,
//! the oldest entries (by creation order, or by last access under
//! [`EvictionOrder::LeastRecentlyUsed`]) are evicted one by one until the
//! store is back at capacity.
//!
//! # Thread Safety
//!
//! Entry map, eviction order and tag index live behind one `RwLock`, so
//! the index never disagrees with the map. Counters are atomics. Fresh
//! reads under creation-order eviction only take the read lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tipline_core::{
    CacheError, EvictionOrder, PersistenceError, PersistencePolicy, Tag, TierPolicy, TiplineResult,
};
use tokio::time::Instant;

use super::entry::Entry;
use super::freshness::CacheRead;
use super::persistence::{PersistedEntry, PersistenceAdapter, PersistenceHook};
use super::stats::{CacheStats, StatsCollector};
use super::tag_index::TagIndex;

/// Maximum number of expired keys removed per write-lock acquisition
/// during [`Store::cleanup`].
pub const CLEANUP_BATCH: usize = 256;

/// Per-insert options: TTL override and group tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    /// TTL for this entry; `None` uses the tier default.
    pub ttl: Option<Duration>,
    pub tags: BTreeSet<Tag>,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the tier's default TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Add a single tag.
    pub fn tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Add several tags.
    pub fn tags<T: Into<Tag>>(mut self, tags: impl IntoIterator<Item = T>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

struct Slot<V> {
    entry: Entry<V>,
    /// Position in the eviction order.
    seq: u64,
    /// Identifies this write of the key; unchanged by recency updates.
    generation: u64,
}

struct StoreState<V> {
    entries: HashMap<String, Slot<V>>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
    tags: TagIndex,
}

impl<V> StoreState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            tags: TagIndex::new(),
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Insert, replacing (and un-indexing) any previous entry for `key`.
    fn insert(&mut self, key: String, entry: Entry<V>) -> Option<Entry<V>> {
        let previous = self.remove(&key);
        let seq = self.bump_seq();
        self.tags.add(entry.tags(), &key);
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key,
            Slot {
                entry,
                seq,
                generation: seq,
            },
        );
        previous
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.seq);
        self.tags.remove(slot.entry.tags(), key);
        Some(slot.entry)
    }

    /// Move `key` to the most-recent end of the eviction order.
    fn touch(&mut self, key: &str) {
        let seq = self.bump_seq();
        if let Some(slot) = self.entries.get_mut(key) {
            self.order.remove(&slot.seq);
            slot.seq = seq;
            self.order.insert(seq, key.to_string());
        }
    }

    /// Evict oldest-first until `len() <= capacity`.
    fn evict_overflow(&mut self, capacity: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > capacity {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&key) {
                self.tags.remove(slot.entry.tags(), &key);
            }
            evicted.push(key);
        }
        evicted
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.tags.clear();
    }
}

/// Result of probing a key under the read lock.
enum Probe<T> {
    Absent,
    Expired,
    Live(T),
}

/// A bounded, TTL-enforcing store for one cache tier.
pub struct Store<V> {
    name: String,
    policy: TierPolicy,
    state: RwLock<StoreState<V>>,
    stats: StatsCollector,
    persistence: Option<PersistenceHook<V>>,
}

impl<V: Clone> Store<V> {
    /// Create an empty store for the tier called `name`.
    pub fn new(name: impl Into<String>, policy: TierPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: RwLock::new(StoreState::new()),
            stats: StatsCollector::new(),
            persistence: None,
        }
    }

    /// Attach a persistence adapter; snapshots are saved according to `policy`.
    pub fn with_persistence(
        mut self,
        adapter: Arc<dyn PersistenceAdapter<V>>,
        policy: PersistencePolicy,
    ) -> Self {
        self.persistence = Some(PersistenceHook::new(adapter, policy));
        self
    }

    /// Create a store with persistence attached and warm it from the
    /// adapter's last snapshot.
    ///
    /// Expired records are skipped. A load failure (corrupt or unreadable
    /// payload) is logged and leaves the store empty.
    pub fn restore(
        name: impl Into<String>,
        policy: TierPolicy,
        adapter: Arc<dyn PersistenceAdapter<V>>,
        persistence_policy: PersistencePolicy,
    ) -> Self {
        let store =
            Self::new(name, policy).with_persistence(Arc::clone(&adapter), persistence_policy);

        match adapter.load() {
            Ok(records) => {
                let total = records.len();
                let restored = store.load_records(records);
                tracing::info!(
                    tier = %store.name,
                    restored,
                    skipped = total - restored,
                    "Restored cache tier from snapshot"
                );
            }
            Err(e) => {
                tracing::warn!(
                    tier = %store.name,
                    error = %e,
                    "Failed to load cache snapshot, starting empty"
                );
            }
        }

        store
    }

    /// Insert live records, oldest first, then enforce capacity.
    /// Returns the number of entries restored.
    fn load_records(&self, mut records: Vec<PersistedEntry<V>>) -> usize {
        records.sort_by_key(|r| r.created_at);
        let now = Instant::now();
        let now_wall = Utc::now();

        let mut state = self.write_state();
        for record in records {
            if let Some((key, entry)) = record.into_entry(now, now_wall) {
                state.insert(key, entry);
            }
        }
        let evicted = state.evict_overflow(self.policy.capacity);
        let restored = state.entries.len();
        drop(state);

        self.stats.record_evictions(evicted.len() as u64);
        restored
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    pub fn capacity(&self) -> usize {
        self.policy.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.policy.default_ttl
    }

    /// Store `value` under `key`, replacing any previous entry and its tags.
    ///
    /// Always succeeds. Capacity is restored afterwards by evicting the
    /// oldest entries.
    pub fn set(&self, key: impl Into<String>, value: V, options: EntryOptions) {
        let key = key.into();
        let ttl = options.ttl.unwrap_or(self.policy.default_ttl);
        let entry = Entry::new(value, ttl, options.tags);

        let evicted = {
            let mut state = self.write_state();
            state.insert(key, entry);
            state.evict_overflow(self.policy.capacity)
        };

        self.after_insert(evicted);
    }

    /// Generation of the entry held under `key`. Every `set` of the key
    /// produces a new generation; reads never change it.
    pub fn generation(&self, key: &str) -> Option<u64> {
        self.read_state().entries.get(key).map(|slot| slot.generation)
    }

    /// Replace the entry under `key` only if it is still the write
    /// identified by `generation`. Returns whether `value` was stored.
    ///
    /// The replaced entry's tags are kept alongside `options.tags`, and its
    /// TTL is reused unless `options.ttl` overrides it. A key that was
    /// deleted, invalidated, cleared, evicted or written again since
    /// `generation` is left as it is.
    pub fn set_if_current(
        &self,
        key: &str,
        generation: u64,
        value: V,
        options: EntryOptions,
    ) -> bool {
        let evicted = {
            let mut state = self.write_state();
            let Some(slot) = state.entries.get(key) else {
                return false;
            };
            if slot.generation != generation {
                return false;
            }

            let ttl = options.ttl.unwrap_or(slot.entry.ttl());
            let mut tags = options.tags;
            tags.extend(slot.entry.tags().iter().cloned());

            state.insert(key.to_string(), Entry::new(value, ttl, tags));
            state.evict_overflow(self.policy.capacity)
        };

        self.after_insert(evicted);
        true
    }

    /// Get a clone of the value under `key`.
    ///
    /// Returns `None` (and counts a miss) when the key is absent or
    /// expired; an expired entry is deleted.
    pub fn get(&self, key: &str) -> Option<V> {
        self.lookup(key).map(CacheRead::into_value)
    }

    /// Like [`get`](Self::get), but returns the value with its age, TTL and
    /// freshness against the tier's staleness horizon.
    pub fn lookup(&self, key: &str) -> Option<CacheRead<V>> {
        let now = Instant::now();

        if self.policy.eviction == EvictionOrder::CreationOrder {
            match self.probe(key, now, |entry| self.read_of(entry, now)) {
                Probe::Absent => {
                    self.stats.record_miss();
                    return None;
                }
                Probe::Live(read) => {
                    self.stats.record_hit();
                    return Some(read);
                }
                Probe::Expired => {}
            }
        }

        // Expired entry to delete, or a recency update: both need the write lock.
        let mut state = self.write_state();
        let expired = match state.entries.get(key) {
            None => None,
            Some(slot) => Some(slot.entry.is_expired_at(now)),
        };

        match expired {
            None => {
                drop(state);
                self.stats.record_miss();
                None
            }
            Some(true) => {
                state.remove(key);
                drop(state);
                self.stats.record_miss();
                self.stats.record_expirations(1);
                tracing::debug!(tier = %self.name, key, "Lazily expired entry");
                None
            }
            Some(false) => {
                if self.policy.eviction == EvictionOrder::LeastRecentlyUsed {
                    state.touch(key);
                }
                let read = state
                    .entries
                    .get(key)
                    .map(|slot| self.read_of(&slot.entry, now));
                drop(state);
                self.stats.record_hit();
                read
            }
        }
    }

    /// Whether a live entry exists under `key`.
    ///
    /// Deletes the entry if it has expired. Does not count as a hit or miss
    /// and does not refresh recency.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        match self.probe(key, now, |_| ()) {
            Probe::Absent => false,
            Probe::Live(()) => true,
            Probe::Expired => {
                let mut state = self.write_state();
                let still_expired = state
                    .entries
                    .get(key)
                    .map(|slot| slot.entry.is_expired_at(now));
                match still_expired {
                    Some(true) => {
                        state.remove(key);
                        drop(state);
                        self.stats.record_expirations(1);
                        false
                    }
                    // Replaced by a fresh `set` between the two locks
                    Some(false) => true,
                    None => false,
                }
            }
        }
    }

    /// Remove `key` and its tag memberships. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.write_state().remove(key).is_some();
        if removed {
            self.after_mutation(1);
        }
        removed
    }

    /// Remove every entry and tag group, and reset the counters.
    pub fn clear(&self) {
        self.write_state().clear();
        self.stats.reset();
        self.after_mutation(1);
    }

    /// Remove every expired entry. Returns the number removed.
    ///
    /// Expired keys are collected under the read lock, then removed in
    /// batches of [`CLEANUP_BATCH`], each batch under a short write lock.
    /// Each key is re-checked before removal, so racing lazy expiration or
    /// a fresh `set` of the same key is harmless.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = {
            let state = self.read_state();
            state
                .entries
                .iter()
                .filter(|(_, slot)| slot.entry.is_expired_at(now))
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut removed = 0;
        for batch in expired.chunks(CLEANUP_BATCH) {
            let mut state = self.write_state();
            for key in batch {
                let is_expired = state
                    .entries
                    .get(key)
                    .is_some_and(|slot| slot.entry.is_expired_at(now));
                if is_expired {
                    state.remove(key);
                    removed += 1;
                }
            }
        }

        self.stats.record_expirations(removed as u64);
        removed
    }

    /// Remove every entry carrying any of `tags`.
    ///
    /// Returns the number of distinct keys removed; a key carrying several
    /// of the requested tags counts once.
    pub fn invalidate_by_tags<S: AsRef<str>>(&self, tags: impl IntoIterator<Item = S>) -> usize {
        let removed = {
            let mut state = self.write_state();
            let keys = state.tags.keys_for(tags);
            keys.iter()
                .filter(|key| state.remove(key.as_str()).is_some())
                .count()
        };

        if removed > 0 {
            tracing::debug!(tier = %self.name, removed, "Invalidated entries by tag");
            self.after_mutation(removed);
        }
        removed
    }

    /// Remove every entry whose key matches the regular expression `pattern`.
    ///
    /// A malformed pattern is rejected with [`CacheError::InvalidPattern`]
    /// before the store is touched.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> TiplineResult<usize> {
        let regex = Regex::new(pattern).map_err(|e| CacheError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.invalidate_matching(&regex))
    }

    /// Remove every entry whose key matches `regex`. Full key scan.
    pub fn invalidate_matching(&self, regex: &Regex) -> usize {
        let removed = {
            let mut state = self.write_state();
            let keys: Vec<String> = state
                .entries
                .keys()
                .filter(|key| regex.is_match(key))
                .cloned()
                .collect();
            for key in &keys {
                state.remove(key);
            }
            keys.len()
        };

        if removed > 0 {
            tracing::debug!(tier = %self.name, pattern = %regex, removed, "Invalidated entries by pattern");
            self.after_mutation(removed);
        }
        removed
    }

    /// Number of entries held, including expired ones not yet collected.
    pub fn len(&self) -> usize {
        self.read_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys, oldest first by the eviction order.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let state = self.read_state();
        state
            .order
            .values()
            .filter(|key| {
                state
                    .entries
                    .get(key.as_str())
                    .is_some_and(|slot| !slot.entry.is_expired_at(now))
            })
            .cloned()
            .collect()
    }

    /// Tags of the live entry under `key`, without counting a hit or miss.
    pub fn tags_of(&self, key: &str) -> Option<BTreeSet<Tag>> {
        let now = Instant::now();
        let state = self.read_state();
        state
            .entries
            .get(key)
            .filter(|slot| !slot.entry.is_expired_at(now))
            .map(|slot| slot.entry.tags().clone())
    }

    /// Hit/miss counters plus current size.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }

    /// All live entries as persistable records, oldest first.
    pub fn snapshot(&self) -> Vec<PersistedEntry<V>> {
        let now = Instant::now();
        let now_wall = Utc::now();
        let state = self.read_state();
        state
            .order
            .values()
            .filter_map(|key| state.entries.get(key.as_str()).map(|slot| (key, slot)))
            .filter(|(_, slot)| !slot.entry.is_expired_at(now))
            .map(|(key, slot)| PersistedEntry::from_entry(key, &slot.entry, now, now_wall))
            .collect()
    }

    /// Save a snapshot now, regardless of the batching policy.
    ///
    /// A no-op for stores without persistence.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        match &self.persistence {
            Some(hook) => {
                hook.reset();
                self.save_snapshot(hook)
            }
            None => Ok(()),
        }
    }

    /// Mutations recorded since the last save (0 without persistence).
    pub fn pending_mutations(&self) -> usize {
        self.persistence.as_ref().map_or(0, PersistenceHook::pending)
    }

    fn after_insert(&self, evicted: Vec<String>) {
        if !evicted.is_empty() {
            self.stats.record_evictions(evicted.len() as u64);
            tracing::trace!(tier = %self.name, evicted = ?evicted, "Evicted entries over capacity");
        }
        self.after_mutation(1);
    }

    fn after_mutation(&self, mutations: usize) {
        let Some(hook) = &self.persistence else {
            return;
        };
        if hook.record(mutations) {
            if let Err(e) = self.save_snapshot(hook) {
                tracing::warn!(tier = %self.name, error = %e, "Failed to persist cache snapshot");
            }
        }
    }

    fn save_snapshot(&self, hook: &PersistenceHook<V>) -> Result<(), PersistenceError> {
        let _guard = hook.lock();
        let snapshot = self.snapshot();
        hook.adapter().save(&snapshot)
    }

    fn read_of(&self, entry: &Entry<V>, now: Instant) -> CacheRead<V> {
        CacheRead::from_cache(
            entry.value().clone(),
            entry.age_at(now),
            entry.ttl(),
            entry.freshness_at(now, self.policy.stale_after),
        )
    }

    fn probe<T>(&self, key: &str, now: Instant, f: impl FnOnce(&Entry<V>) -> T) -> Probe<T> {
        let state = self.read_state();
        match state.entries.get(key) {
            None => Probe::Absent,
            Some(slot) if slot.entry.is_expired_at(now) => Probe::Expired,
            Some(slot) => Probe::Live(f(&slot.entry)),
        }
    }

    // Every mutation completes its map/order/index updates before any call
    // that could panic, so a poisoned lock still guards consistent state.
    fn read_state(&self) -> RwLockReadGuard<'_, StoreState<V>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState<V>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
