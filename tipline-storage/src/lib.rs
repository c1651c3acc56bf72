//! TIPLINE Storage - Application Cache Layer
//!
//! A typed, in-process cache that sits between dashboard consumers and the
//! slow data sources behind them. Each data class gets its own bounded
//! [`Store`] (a named tier); reads go through [`ReadThroughCache`], which
//! calls the consumer's producer on a miss and can serve stale values while
//! refreshing them in the background.

pub mod cache;

pub use cache::{
    cleanup_task, spawn_cleanup, CacheRead, CacheStats, CacheTiers, CleanupMetrics,
    CleanupSnapshot, Entry, EntryOptions, Freshness, LmdbPersistence, LmdbTierStore,
    PersistedEntry, PersistenceAdapter, Producer, ReadOptions, ReadOrigin, ReadThroughCache,
    StatsCollector, Store, TagIndex,
};

pub use tipline_core::{
    CacheConfig, CacheError, CacheKey, EvictionOrder, FetchError, PersistencePolicy, Tag,
    TierClass, TierPolicy, TiplineError, TiplineResult,
};
