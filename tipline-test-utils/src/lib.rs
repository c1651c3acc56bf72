//! TIPLINE Test Utilities
//!
//! Shared test infrastructure for the TIPLINE workspace:
//! - Proptest generators for keys, tags and store operations
//! - Mock producers for read-through tests
//! - In-memory and failing persistence adapters
//! - Test fixtures for common scenarios
//! - Custom assertions for TIPLINE error variants

// Re-export core types for convenience
pub use tipline_core::{
    CacheConfig, CacheError, EvictionOrder, FetchError, PersistenceError, PersistencePolicy, Tag,
    TierClass, TierPolicy, TiplineError, TiplineResult,
};
pub use tipline_storage::{PersistedEntry, PersistenceAdapter, Producer};

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

// ============================================================================
// MOCK PRODUCERS
// ============================================================================

/// Producer that returns its values in order, then repeats the last one.
#[derive(Debug, Clone)]
pub struct SequenceProducer<V> {
    values: Arc<Vec<V>>,
    calls: Arc<AtomicUsize>,
}

impl<V> SequenceProducer<V> {
    pub fn new(values: impl IntoIterator<Item = V>) -> Self {
        Self {
            values: Arc::new(values.into_iter().collect()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of times `produce` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<V> Producer<V> for SequenceProducer<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn produce(&self, key: &str) -> Result<V, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.values
            .get(n)
            .or_else(|| self.values.last())
            .cloned()
            .ok_or_else(|| FetchError::Unavailable {
                reason: format!("no values configured for {key}"),
            })
    }
}

/// Producer that always returns the same value and counts calls.
#[derive(Debug, Clone)]
pub struct CountingProducer<V> {
    value: V,
    calls: Arc<AtomicUsize>,
}

impl<V> CountingProducer<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<V> Producer<V> for CountingProducer<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn produce(&self, _key: &str) -> Result<V, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.value.clone())
    }
}

/// Producer that blocks every call until [`open`](Self::open) is called.
///
/// Used to hold a background refresh in flight while a test observes the
/// cache.
#[derive(Debug, Clone)]
pub struct GatedProducer<V> {
    value: V,
    gate: Arc<Semaphore>,
    calls: Arc<AtomicUsize>,
}

impl<V> GatedProducer<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            gate: Arc::new(Semaphore::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Release all current and future calls.
    pub fn open(&self) {
        self.gate.add_permits(1);
    }

    /// Number of calls that have started (including blocked ones).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<V> Producer<V> for GatedProducer<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn produce(&self, _key: &str) -> Result<V, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Permit is returned on drop, so one `open` releases every caller.
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| FetchError::Unavailable {
                reason: "gate closed".to_string(),
            })?;
        Ok(self.value.clone())
    }
}

/// Producer that always fails with the configured error.
#[derive(Debug, Clone)]
pub struct FailingProducer {
    error: FetchError,
    calls: Arc<AtomicUsize>,
}

impl FailingProducer {
    pub fn new(error: FetchError) -> Self {
        Self {
            error,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails with a 503 from a fake odds endpoint.
    pub fn unavailable() -> Self {
        Self::new(FetchError::RequestFailed {
            endpoint: "https://odds.invalid/v1/lines".to_string(),
            status: 503,
            message: "service unavailable".to_string(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<V> Producer<V> for FailingProducer
where
    V: Send + 'static,
{
    async fn produce(&self, _key: &str) -> Result<V, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

// ============================================================================
// PERSISTENCE ADAPTERS
// ============================================================================

/// In-memory adapter that stores the snapshot as JSON bytes, so tests
/// exercise the same serialization path as the LMDB adapter.
#[derive(Debug)]
pub struct MemoryPersistence<V> {
    snapshot: Mutex<Option<Vec<u8>>>,
    saves: AtomicUsize,
    _value: PhantomData<fn() -> V>,
}

impl<V> Default for MemoryPersistence<V> {
    fn default() -> Self {
        Self {
            snapshot: Mutex::new(None),
            saves: AtomicUsize::new(0),
            _value: PhantomData,
        }
    }
}

impl<V> MemoryPersistence<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Replace the saved snapshot with bytes that are not valid JSON.
    pub fn corrupt(&self) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(b"\x00\x01 not a snapshot".to_vec());
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<V> PersistenceAdapter<V> for MemoryPersistence<V>
where
    V: serde::Serialize + serde::de::DeserializeOwned,
{
    fn save(&self, entries: &[PersistedEntry<V>]) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(entries)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> Result<Vec<PersistedEntry<V>>, PersistenceError> {
        let guard = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_deref() {
            None => Ok(Vec::new()),
            Some(bytes) => serde_json::from_slice(bytes)
                .map_err(|e| PersistenceError::Deserialization(e.to_string())),
        }
    }
}

/// Adapter whose every call fails, counting attempted saves.
#[derive(Debug, Default)]
pub struct FailingPersistence {
    attempts: AtomicUsize,
}

impl FailingPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<V> PersistenceAdapter<V> for FailingPersistence {
    fn save(&self, _entries: &[PersistedEntry<V>]) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PersistenceError::Io("disk unavailable".to_string()))
    }

    fn load(&self) -> Result<Vec<PersistedEntry<V>>, PersistenceError> {
        Err(PersistenceError::Io("disk unavailable".to_string()))
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly `tracing` subscriber.
///
/// Honours `RUST_LOG` (default `tipline=debug`). Safe to call from every
/// test; only the first call installs the subscriber.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tipline_storage=debug,tipline_core=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys, tags and operation sequences.

    use proptest::prelude::*;
    use std::collections::BTreeSet;

    /// Generate a cache key from a small keyspace so sequences collide.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "(odds|signals|user):[a-d][0-9]"
    }

    /// Generate a tag from a small, fixed vocabulary.
    pub fn arb_tag() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "odds".to_string(),
            "signals".to_string(),
            "league:nba".to_string(),
            "league:nfl".to_string(),
            "user:1".to_string(),
            "user:2".to_string(),
        ])
    }

    /// Generate a tag set of zero to three tags.
    pub fn arb_tags() -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set(arb_tag(), 0..=3)
    }

    /// One operation against a store, for model-based tests.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum StoreOp {
        Set {
            key: String,
            value: u32,
            tags: BTreeSet<String>,
        },
        Get {
            key: String,
        },
        Delete {
            key: String,
        },
        InvalidateTags {
            tags: Vec<String>,
        },
    }

    /// Generate a store operation, weighted towards writes.
    pub fn arb_store_op() -> impl Strategy<Value = StoreOp> {
        prop_oneof![
            4 => (arb_key(), any::<u32>(), arb_tags())
                .prop_map(|(key, value, tags)| StoreOp::Set { key, value, tags }),
            2 => arb_key().prop_map(|key| StoreOp::Get { key }),
            1 => arb_key().prop_map(|key| StoreOp::Delete { key }),
            1 => prop::collection::vec(arb_tag(), 1..=2)
                .prop_map(|tags| StoreOp::InvalidateTags { tags }),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations for common testing scenarios.

    use super::*;
    use std::path::Path;
    use std::time::Duration;

    /// Default tiers with `realtime` shrunk to a 30s TTL and capacity 2.
    pub fn scenario_config() -> CacheConfig {
        CacheConfig::default().with_tier(
            TierClass::Realtime.name(),
            TierPolicy::new(Duration::from_secs(30), 2),
        )
    }

    /// Default tiers with persistence enabled at `path`, saving on every
    /// mutation.
    pub fn persistent_config(path: &Path) -> CacheConfig {
        let mut config = CacheConfig::default();
        config.persistence.enabled = true;
        config.persistence.path = path.to_path_buf();
        config.persistence.max_size_mb = 10;
        config.persistence.policy = PersistencePolicy::EveryMutation;
        config
    }

    /// A policy with a 30s TTL, 10s staleness horizon and the given capacity.
    pub fn swr_policy(capacity: usize) -> TierPolicy {
        TierPolicy::new(Duration::from_secs(30), capacity).with_stale_after(Duration::from_secs(10))
    }

    /// A persisted record created `age` ago.
    pub fn persisted(
        key: &str,
        value: u32,
        ttl: Duration,
        age: Duration,
        tags: &[&str],
    ) -> PersistedEntry<u32> {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::zero());
        PersistedEntry {
            key: key.to_string(),
            value,
            created_at: chrono::Utc::now() - age,
            ttl,
            tags: tags.iter().map(|t| Tag::from(*t)).collect(),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for TIPLINE error variants.

    use super::*;

    /// Assert that a result failed because its producer failed.
    #[track_caller]
    pub fn assert_producer_failed<T: std::fmt::Debug>(result: &TiplineResult<T>) {
        match result {
            Err(TiplineError::Cache(CacheError::ProducerFailed { .. })) => {}
            other => panic!("Expected ProducerFailed error, got: {:?}", other),
        }
    }

    /// Assert that a result is an invalid invalidation pattern error.
    #[track_caller]
    pub fn assert_invalid_pattern<T: std::fmt::Debug>(result: &TiplineResult<T>) {
        match result {
            Err(TiplineError::Cache(CacheError::InvalidPattern { .. })) => {}
            other => panic!("Expected InvalidPattern error, got: {:?}", other),
        }
    }

    /// Assert that a result is a configuration error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &TiplineResult<T>) {
        match result {
            Err(TiplineError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}
