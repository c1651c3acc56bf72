//! Tiered application cache.
//!
//! This module provides a bounded, tag-indexed store per data tier and a
//! read-through layer that calls a caller-supplied producer on a miss.
//!
//! # Design Philosophy
//!
//! Staleness is explicit. Every read returns [`CacheRead<T>`], which carries
//! the value's age and whether it was past its staleness horizon, so a
//! consumer can decide how to present a value that is being refreshed.
//! Expiration is hard: an expired entry is never served.
//!
//! # Example
//!
//! ```ignore
//! let tiers: CacheTiers<Odds> = CacheTiers::open(&CacheConfig::from_env()?)?;
//! let realtime = tiers.class(TierClass::Realtime)?;
//!
//! let read = realtime
//!     .read_through("odds:nba:lal-bos", ReadOptions::new().tag("league:nba"), fetch_odds)
//!     .await?;
//!
//! // An admin edit to NBA lines drops every dependent entry in every tier
//! tiers.invalidate_by_tags_all(&["league:nba"]);
//! ```

pub mod entry;
pub mod freshness;
pub mod lmdb_backend;
pub mod maintenance;
pub mod persistence;
pub mod read_through;
pub mod stats;
pub mod store;
pub mod tag_index;
pub mod tiers;

pub use entry::Entry;
pub use freshness::{CacheRead, Freshness, ReadOrigin};
pub use lmdb_backend::{LmdbPersistence, LmdbTierStore};
pub use maintenance::{cleanup_task, spawn_cleanup, CleanupMetrics, CleanupSnapshot};
pub use persistence::{PersistedEntry, PersistenceAdapter};
pub use read_through::{Producer, ReadOptions, ReadThroughCache};
pub use stats::{CacheStats, StatsCollector};
pub use store::{EntryOptions, Store, CLEANUP_BATCH};
pub use tag_index::TagIndex;
pub use tiers::CacheTiers;
