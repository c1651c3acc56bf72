//! LMDB-backed snapshot persistence.
//!
//! Uses the heed crate (Rust bindings for LMDB). One environment is opened
//! per process; each cache tier gets its own named database inside it, so
//! saving one tier never rewrites another.
//!
//! # Record Format
//!
//! Database key: the cache key (UTF-8).
//! Database value: the JSON-encoded [`PersistedEntry`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. `save` clears and refills a tier's
//! database inside one write transaction, so a concurrent `load` sees
//! either the previous snapshot or the new one, never a mix.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tipline_core::PersistenceError;

use super::persistence::{PersistedEntry, PersistenceAdapter};

/// Upper bound on named databases (tiers) in one environment.
const MAX_TIER_DBS: u32 = 16;

/// An open LMDB environment shared by all tiers.
///
/// # Example
///
/// ```ignore
/// let lmdb = LmdbPersistence::new("/var/cache/tipline", 64)?;
/// let realtime: LmdbTierStore<Odds> = lmdb.tier("realtime")?;
/// let store = Store::restore("realtime", policy, Arc::new(realtime), PersistencePolicy::default());
/// ```
#[derive(Clone)]
pub struct LmdbPersistence {
    env: Env,
    path: PathBuf,
}

impl std::fmt::Debug for LmdbPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbPersistence")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LmdbPersistence {
    /// Open (or create) the environment.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the memory map in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path in this process and
        // the files are not modified by anything other than this environment.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(MAX_TIER_DBS)
                .open(path.as_ref())
        }
        .map_err(|e| PersistenceError::EnvOpen(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB environment");

        Ok(Self {
            env,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open (or create) the named database for one tier.
    pub fn tier<V>(&self, name: &str) -> Result<LmdbTierStore<V>, PersistenceError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| PersistenceError::Transaction(e.to_string()))?;

        let db: Database<Str, Bytes> = self
            .env
            .create_database(&mut wtxn, Some(name))
            .map_err(|e| PersistenceError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| PersistenceError::Transaction(e.to_string()))?;

        Ok(LmdbTierStore {
            env: self.env.clone(),
            db,
            name: name.to_string(),
            _value: PhantomData,
        })
    }
}

/// One tier's named database, usable as a store's [`PersistenceAdapter`].
pub struct LmdbTierStore<V> {
    env: Env,
    db: Database<Str, Bytes>,
    name: String,
    _value: PhantomData<fn() -> V>,
}

impl<V> LmdbTierStore<V> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of records in the last saved snapshot.
    pub fn record_count(&self) -> Result<u64, PersistenceError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| PersistenceError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| PersistenceError::Transaction(e.to_string()))
    }
}

impl<V> PersistenceAdapter<V> for LmdbTierStore<V>
where
    V: Serialize + DeserializeOwned,
{
    fn save(&self, entries: &[PersistedEntry<V>]) -> Result<(), PersistenceError> {
        let encoded = entries
            .iter()
            .map(|entry| {
                serde_json::to_vec(entry)
                    .map(|bytes| (entry.key.as_str(), bytes))
                    .map_err(|e| PersistenceError::Serialization(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| PersistenceError::Transaction(e.to_string()))?;

        self.db
            .clear(&mut wtxn)
            .map_err(|e| PersistenceError::Transaction(e.to_string()))?;

        for (key, bytes) in &encoded {
            self.db
                .put(&mut wtxn, key, bytes)
                .map_err(|e| PersistenceError::Transaction(e.to_string()))?;
        }

        wtxn.commit()
            .map_err(|e| PersistenceError::Transaction(e.to_string()))?;

        tracing::trace!(tier = %self.name, records = encoded.len(), "Saved cache snapshot");
        Ok(())
    }

    fn load(&self) -> Result<Vec<PersistedEntry<V>>, PersistenceError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| PersistenceError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| PersistenceError::Transaction(e.to_string()))?;

        let mut records = Vec::new();
        for result in iter {
            let (key, bytes) = result.map_err(|e| PersistenceError::Deserialization(e.to_string()))?;
            match serde_json::from_slice::<PersistedEntry<V>>(bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(tier = %self.name, key, error = %e, "Skipping unreadable cache record");
                }
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tipline_core::Tag;

    fn create_test_env() -> (LmdbPersistence, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let lmdb = LmdbPersistence::new(temp_dir.path(), 10).expect("env creation should succeed");
        (lmdb, temp_dir)
    }

    fn record(key: &str, value: u32) -> PersistedEntry<u32> {
        PersistedEntry {
            key: key.to_string(),
            value,
            created_at: Utc::now(),
            ttl: Duration::from_secs(60),
            tags: [Tag::from("odds")].into_iter().collect(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let (lmdb, _dir) = create_test_env();
        let store: LmdbTierStore<u32> = lmdb.tier("realtime").unwrap();

        store.save(&[record("a", 1), record("b", 2)]).unwrap();
        let mut loaded = store.load().unwrap();
        loaded.sort_by(|x, y| x.key.cmp(&y.key));

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].value, 1);
        assert!(loaded[1].tags.contains("odds"));
        assert_eq!(store.record_count().unwrap(), 2);
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let (lmdb, _dir) = create_test_env();
        let store: LmdbTierStore<u32> = lmdb.tier("realtime").unwrap();

        store.save(&[record("a", 1), record("b", 2)]).unwrap();
        store.save(&[record("c", 3)]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, "c");
    }

    #[test]
    fn test_tiers_are_isolated() {
        let (lmdb, _dir) = create_test_env();
        let realtime: LmdbTierStore<u32> = lmdb.tier("realtime").unwrap();
        let user: LmdbTierStore<u32> = lmdb.tier("user").unwrap();

        realtime.save(&[record("a", 1)]).unwrap();
        user.save(&[]).unwrap();

        assert_eq!(realtime.load().unwrap().len(), 1);
        assert!(user.load().unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_record_is_skipped() {
        let (lmdb, _dir) = create_test_env();
        let store: LmdbTierStore<u32> = lmdb.tier("realtime").unwrap();
        store.save(&[record("a", 1)]).unwrap();

        let mut wtxn = store.env.write_txn().unwrap();
        store.db.put(&mut wtxn, "garbage", b"{not json").unwrap();
        wtxn.commit().unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, "a");
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let lmdb = LmdbPersistence::new(temp_dir.path(), 10).unwrap();
            let store: LmdbTierStore<u32> = lmdb.tier("historical").unwrap();
            store.save(&[record("a", 7)]).unwrap();
        }

        let lmdb = LmdbPersistence::new(temp_dir.path(), 10).unwrap();
        let store: LmdbTierStore<u32> = lmdb.tier("historical").unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].value, 7);
    }
}
