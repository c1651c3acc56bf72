//! Best-effort snapshot persistence for warm starts.
//!
//! A store with an attached adapter writes a snapshot of its live entries
//! after mutations (every one, or in batches) and can be rebuilt from the
//! last snapshot at process start. Monotonic instants do not survive a
//! restart, so records carry a wall-clock `created_at` and the remaining
//! lifetime is recomputed against the loading process's clock.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tipline_core::{PersistenceError, PersistencePolicy, Tag};
use tokio::time::Instant;

use super::entry::Entry;

/// Self-describing on-disk record for one cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "ttl_ms", with = "tipline_core::duration_ms")]
    pub ttl: Duration,
    #[serde(default)]
    pub tags: BTreeSet<Tag>,
}

impl<V> PersistedEntry<V> {
    /// Build a record from a live entry, converting its monotonic creation
    /// instant to wall-clock time.
    pub(crate) fn from_entry(key: &str, entry: &Entry<V>, now: Instant, now_wall: DateTime<Utc>) -> Self
    where
        V: Clone,
    {
        let age = chrono::Duration::from_std(entry.age_at(now)).unwrap_or(chrono::Duration::zero());
        Self {
            key: key.to_string(),
            value: entry.value().clone(),
            created_at: now_wall - age,
            ttl: entry.ttl(),
            tags: entry.tags().clone(),
        }
    }

    /// Time elapsed since creation by the given wall clock. Records from
    /// the future (clock skew) count as just created.
    pub fn elapsed_at(&self, now_wall: DateTime<Utc>) -> Duration {
        (now_wall - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired_at(&self, now_wall: DateTime<Utc>) -> bool {
        self.elapsed_at(now_wall) >= self.ttl
    }

    /// Rebuild a live entry, or `None` if the record has already expired.
    pub(crate) fn into_entry(self, now: Instant, now_wall: DateTime<Utc>) -> Option<(String, Entry<V>)> {
        let elapsed = self.elapsed_at(now_wall);
        if elapsed >= self.ttl {
            return None;
        }

        let entry = match now.checked_sub(elapsed) {
            Some(created_at) => Entry::with_created_at(self.value, created_at, self.ttl, self.tags),
            // The monotonic clock cannot reach back that far; start the
            // entry now with only its remaining lifetime.
            None => Entry::with_created_at(self.value, now, self.ttl - elapsed, self.tags),
        };
        Some((self.key, entry))
    }
}

/// Durable key-value storage for store snapshots.
///
/// Implementations must be thread-safe. `save` replaces whatever was
/// saved before; `load` returns the last saved snapshot (or nothing).
pub trait PersistenceAdapter<V>: Send + Sync {
    fn save(&self, entries: &[PersistedEntry<V>]) -> Result<(), PersistenceError>;

    fn load(&self) -> Result<Vec<PersistedEntry<V>>, PersistenceError>;
}

/// Save scheduling attached to a store.
pub(crate) struct PersistenceHook<V> {
    adapter: Arc<dyn PersistenceAdapter<V>>,
    threshold: usize,
    pending: AtomicUsize,
    /// Serializes snapshot+save so an older snapshot never lands last.
    save_lock: Mutex<()>,
}

impl<V> PersistenceHook<V> {
    pub(crate) fn new(adapter: Arc<dyn PersistenceAdapter<V>>, policy: PersistencePolicy) -> Self {
        Self {
            adapter,
            threshold: policy.threshold(),
            pending: AtomicUsize::new(0),
            save_lock: Mutex::new(()),
        }
    }

    /// Count mutations; returns true once a save is due.
    ///
    /// Counting and the reset at the threshold happen in one atomic update,
    /// so exactly one caller sees each save come due.
    pub(crate) fn record(&self, mutations: usize) -> bool {
        let threshold = self.threshold;
        let next = |pending: usize| pending.saturating_add(mutations);
        let previous = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                Some(if next(pending) >= threshold { 0 } else { next(pending) })
            })
            .unwrap_or_else(|pending| pending);
        next(previous) >= threshold
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.pending.store(0, Ordering::Release);
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.save_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn adapter(&self) -> &dyn PersistenceAdapter<V> {
        self.adapter.as_ref()
    }
}
