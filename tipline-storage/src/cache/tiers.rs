//! Named cache tiers.
//!
//! A [`CacheTiers`] holds one independent store per configured tier. Tiers
//! never share capacity: filling `realtime` never evicts from `user`.
//! Construct it once at process start and hand it to consumers by `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tipline_core::{CacheConfig, CacheError, PersistenceError, TierClass, TiplineResult};

use super::lmdb_backend::LmdbPersistence;
use super::persistence::PersistenceAdapter;
use super::read_through::ReadThroughCache;
use super::stats::CacheStats;
use super::store::Store;

/// The set of named stores built from a [`CacheConfig`].
pub struct CacheTiers<V> {
    tiers: BTreeMap<String, ReadThroughCache<V>>,
}

impl<V> Clone for CacheTiers<V> {
    fn clone(&self) -> Self {
        Self {
            tiers: self.tiers.clone(),
        }
    }
}

impl<V> CacheTiers<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Build empty, in-memory tiers from a validated configuration.
    pub fn from_config(config: &CacheConfig) -> TiplineResult<Self> {
        config.validate()?;

        let tiers = config
            .tiers
            .iter()
            .map(|(name, policy)| {
                let store = Store::new(name.as_str(), policy.clone());
                (name.clone(), ReadThroughCache::new(Arc::new(store)))
            })
            .collect();

        Ok(Self { tiers })
    }

    /// Build tiers restored from per-tier persistence adapters.
    ///
    /// `open` is called once per tier name. A tier whose adapter cannot be
    /// opened runs without persistence; the failure is logged.
    pub fn with_adapters<F>(config: &CacheConfig, mut open: F) -> TiplineResult<Self>
    where
        F: FnMut(&str) -> Result<Arc<dyn PersistenceAdapter<V>>, PersistenceError>,
    {
        config.validate()?;
        let persist_policy = config.persistence.policy;

        let tiers = config
            .tiers
            .iter()
            .map(|(name, policy)| {
                let store = match open(name) {
                    Ok(adapter) => {
                        Store::restore(name.as_str(), policy.clone(), adapter, persist_policy)
                    }
                    Err(e) => {
                        tracing::warn!(
                            tier = %name,
                            error = %e,
                            "Failed to open tier persistence, running in memory"
                        );
                        Store::new(name.as_str(), policy.clone())
                    }
                };
                (name.clone(), ReadThroughCache::new(Arc::new(store)))
            })
            .collect();

        Ok(Self { tiers })
    }

    /// Build tiers, restoring each one from its named LMDB database when
    /// persistence is enabled in `config`.
    pub fn restore(config: &CacheConfig, persistence: &LmdbPersistence) -> TiplineResult<Self>
    where
        V: Serialize + DeserializeOwned,
    {
        if !config.persistence.enabled {
            return Self::from_config(config);
        }

        Self::with_adapters(config, |name| {
            let tier = persistence.tier::<V>(name)?;
            Ok(Arc::new(tier) as Arc<dyn PersistenceAdapter<V>>)
        })
    }

    /// Build tiers from `config`, opening the LMDB environment it names.
    ///
    /// If the environment cannot be opened the tiers run in memory; a warm
    /// start is a convenience, not a requirement.
    pub fn open(config: &CacheConfig) -> TiplineResult<Self>
    where
        V: Serialize + DeserializeOwned,
    {
        if !config.persistence.enabled {
            return Self::from_config(config);
        }

        match LmdbPersistence::new(&config.persistence.path, config.persistence.max_size_mb) {
            Ok(lmdb) => Self::restore(config, &lmdb),
            Err(e) => {
                tracing::warn!(
                    path = %config.persistence.path.display(),
                    error = %e,
                    "Failed to open cache persistence, running in memory"
                );
                Self::from_config(config)
            }
        }
    }

    /// Look up a tier by name.
    pub fn tier(&self, name: &str) -> TiplineResult<&ReadThroughCache<V>> {
        self.tiers.get(name).ok_or_else(|| {
            CacheError::UnknownTier {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Look up a built-in tier.
    pub fn class(&self, class: TierClass) -> TiplineResult<&ReadThroughCache<V>> {
        self.tier(class.name())
    }

    /// Tier names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tiers.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReadThroughCache<V>)> {
        self.tiers.iter().map(|(name, cache)| (name.as_str(), cache))
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Sweep expired entries from every tier. Returns the total removed.
    pub fn cleanup_all(&self) -> usize {
        self.tiers.values().map(ReadThroughCache::cleanup).sum()
    }

    pub fn clear_all(&self) {
        for cache in self.tiers.values() {
            cache.clear();
        }
    }

    /// Drop every entry carrying any of `tags`, in every tier.
    pub fn invalidate_by_tags_all<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        self.tiers
            .values()
            .map(|cache| cache.invalidate_by_tags(tags))
            .sum()
    }

    /// Per-tier statistics.
    pub fn stats(&self) -> BTreeMap<String, CacheStats> {
        self.tiers
            .iter()
            .map(|(name, cache)| (name.clone(), cache.stats()))
            .collect()
    }

    /// Save every persistent tier now.
    ///
    /// All tiers are attempted; the first failure is returned after the
    /// rest have been flushed.
    pub fn flush_all(&self) -> Result<(), PersistenceError> {
        let mut first_error = None;
        for (name, cache) in &self.tiers {
            if let Err(e) = cache.store().flush() {
                tracing::warn!(tier = %name, error = %e, "Failed to flush cache tier");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tipline_core::{TierPolicy, TiplineError};

    use crate::cache::store::EntryOptions;

    #[test]
    fn test_default_tiers() {
        let tiers: CacheTiers<String> = CacheTiers::from_config(&CacheConfig::default()).unwrap();
        let names: Vec<&str> = tiers.names().collect();
        assert_eq!(
            names,
            vec!["configuration", "historical", "realtime", "signals", "user"]
        );

        let realtime = tiers.class(TierClass::Realtime).unwrap();
        assert_eq!(realtime.store().default_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_tier() {
        let tiers: CacheTiers<String> = CacheTiers::from_config(&CacheConfig::default()).unwrap();
        assert!(matches!(
            tiers.tier("odds"),
            Err(TiplineError::Cache(CacheError::UnknownTier { .. }))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CacheConfig::default()
            .with_tier("broken", TierPolicy::new(Duration::from_secs(1), 0));
        assert!(CacheTiers::<String>::from_config(&config).is_err());
    }

    #[test]
    fn test_tiers_are_independent() {
        let config = CacheConfig::default()
            .with_tier("realtime", TierPolicy::new(Duration::from_secs(30), 1));
        let tiers: CacheTiers<String> = CacheTiers::from_config(&config).unwrap();
        let realtime = tiers.tier("realtime").unwrap();
        let user = tiers.tier("user").unwrap();

        user.set("profile:1", "p".to_string(), EntryOptions::new());
        realtime.set("a", "1".to_string(), EntryOptions::new());
        realtime.set("b", "2".to_string(), EntryOptions::new());

        assert!(user.has("profile:1"));
        assert!(!realtime.has("a"));
    }

    #[test]
    fn test_invalidate_by_tags_all_spans_tiers() {
        let tiers: CacheTiers<String> = CacheTiers::from_config(&CacheConfig::default()).unwrap();
        let opts = EntryOptions::new().tag("league:nba");
        tiers.tier("realtime").unwrap().set("odds", "1".to_string(), opts.clone());
        tiers.tier("signals").unwrap().set("sig", "2".to_string(), opts);
        tiers.tier("user").unwrap().set("me", "3".to_string(), EntryOptions::new());

        assert_eq!(tiers.invalidate_by_tags_all(&["league:nba"]), 2);
        assert_eq!(tiers.stats().values().map(|s| s.size).sum::<usize>(), 1);

        tiers.clear_all();
        assert!(tiers.stats().values().all(|s| s.size == 0));
    }

    #[test]
    fn test_flush_all_without_persistence() {
        let tiers: CacheTiers<String> = CacheTiers::from_config(&CacheConfig::default()).unwrap();
        assert!(tiers.flush_all().is_ok());
    }
}
