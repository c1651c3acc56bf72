//! Cache configuration types
//!
//! Configuration is layered: the built-in tier table, then an optional TOML
//! file, then environment variable overrides.

use crate::error::{ConfigError, TiplineError, TiplineResult};
use crate::tiers::{TierClass, TierSpec, DEFAULT_TIERS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Order in which entries are evicted once a store exceeds its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionOrder {
    /// Oldest insertion first; reads do not change the order.
    #[default]
    CreationOrder,
    /// Least recently read or written first; reads refresh recency.
    LeastRecentlyUsed,
}

/// Policy for a single named cache tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// TTL applied when a `set` does not specify one.
    #[serde(rename = "default_ttl_ms", with = "crate::duration_ms")]
    pub default_ttl: Duration,
    /// Soft upper bound on the number of entries.
    pub capacity: usize,
    /// Age after which a still-live entry is refreshed in the background
    /// by stale-while-revalidate reads.
    #[serde(
        rename = "stale_after_ms",
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::duration_ms::option"
    )]
    pub stale_after: Option<Duration>,
    #[serde(default)]
    pub eviction: EvictionOrder,
}

impl TierPolicy {
    /// Create a policy with creation-order eviction and no staleness horizon.
    pub fn new(default_ttl: Duration, capacity: usize) -> Self {
        Self {
            default_ttl,
            capacity,
            stale_after: None,
            eviction: EvictionOrder::CreationOrder,
        }
    }

    /// Set the staleness horizon.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    /// Set the eviction order.
    pub fn with_eviction(mut self, eviction: EvictionOrder) -> Self {
        self.eviction = eviction;
        self
    }

    /// Validate the policy for the tier called `name`.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("tiers.{name}.capacity"),
                value: self.capacity.to_string(),
                reason: "capacity must be greater than 0".to_string(),
            });
        }

        if self.default_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: format!("tiers.{name}.default_ttl_ms"),
                value: format!("{:?}", self.default_ttl),
                reason: "default_ttl must be positive".to_string(),
            });
        }

        if let Some(stale_after) = self.stale_after {
            if stale_after >= self.default_ttl {
                return Err(ConfigError::InvalidValue {
                    field: format!("tiers.{name}.stale_after_ms"),
                    value: format!("{:?}", stale_after),
                    reason: "stale_after must be shorter than default_ttl".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl From<&TierSpec> for TierPolicy {
    fn from(spec: &TierSpec) -> Self {
        Self {
            default_ttl: spec.default_ttl,
            capacity: spec.capacity,
            stale_after: spec.stale_after,
            eviction: EvictionOrder::CreationOrder,
        }
    }
}

/// When a store writes its snapshot to the persistence adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PersistencePolicy {
    /// Save after every mutating operation.
    EveryMutation,
    /// Save once `every` mutating operations have accumulated.
    Batched { every: usize },
}

impl Default for PersistencePolicy {
    fn default() -> Self {
        PersistencePolicy::Batched { every: 16 }
    }
}

impl PersistencePolicy {
    /// Number of mutations that triggers a save.
    pub fn threshold(&self) -> usize {
        match self {
            PersistencePolicy::EveryMutation => 1,
            PersistencePolicy::Batched { every } => (*every).max(1),
        }
    }
}

/// Best-effort warm-start persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Directory holding the LMDB environment.
    pub path: PathBuf,
    /// Maximum size of the LMDB map in megabytes.
    pub max_size_mb: usize,
    pub policy: PersistencePolicy,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from(".tipline-cache"),
            max_size_mb: 64,
            policy: PersistencePolicy::default(),
        }
    }
}

/// Periodic maintenance settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// How often expired entries are swept from every tier.
    #[serde(rename = "cleanup_interval_ms", with = "crate::duration_ms")]
    pub cleanup_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Master cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub tiers: BTreeMap<String, TierPolicy>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tiers: DEFAULT_TIERS
                .iter()
                .map(|spec| (spec.class.name().to_string(), TierPolicy::from(spec)))
                .collect(),
            persistence: PersistenceConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

/// On-disk shape: every section optional, tiers merged over the defaults.
#[derive(Debug, Default, Deserialize)]
struct CacheConfigFile {
    #[serde(default)]
    tiers: BTreeMap<String, TierPolicy>,
    persistence: Option<PersistenceConfig>,
    maintenance: Option<MaintenanceConfig>,
}

impl CacheConfig {
    /// Parse a TOML document, merging its tiers over the default table.
    ///
    /// ```toml
    /// [tiers.realtime]
    /// default_ttl_ms = 15000
    /// capacity = 250
    /// stale_after_ms = 5000
    /// eviction = "least_recently_used"
    ///
    /// [persistence]
    /// enabled = true
    /// path = "/var/cache/tipline"
    /// policy = { mode = "batched", every = 8 }
    /// ```
    pub fn from_toml_str(input: &str) -> TiplineResult<Self> {
        let file: CacheConfigFile = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;

        let mut config = Self::default();
        config.tiers.extend(file.tiers);
        if let Some(persistence) = file.persistence {
            config.persistence = persistence;
        }
        if let Some(maintenance) = file.maintenance {
            config.maintenance = maintenance;
        }
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> TiplineResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Build the configuration from the environment.
    ///
    /// Environment variables:
    /// - `TIPLINE_CACHE_CONFIG`: Path to a TOML file (default: built-in tier table)
    /// - `TIPLINE_CACHE_DIR`: Enables persistence in this directory
    /// - `TIPLINE_CACHE_PERSIST_EVERY`: Save after this many mutations (1 = every mutation)
    /// - `TIPLINE_CACHE_CLEANUP_INTERVAL_SECS`: Cleanup sweep interval (default: 60)
    pub fn from_env() -> TiplineResult<Self> {
        let mut config = match std::env::var("TIPLINE_CACHE_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };

        if let Some(dir) = std::env::var("TIPLINE_CACHE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
        {
            config.persistence.enabled = true;
            config.persistence.path = PathBuf::from(dir.trim());
        }

        if let Some(every) = std::env::var("TIPLINE_CACHE_PERSIST_EVERY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            config.persistence.policy = if every <= 1 {
                PersistencePolicy::EveryMutation
            } else {
                PersistencePolicy::Batched { every }
            };
        }

        if let Some(secs) = std::env::var("TIPLINE_CACHE_CLEANUP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.maintenance.cleanup_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Look up the policy for a named tier.
    pub fn tier(&self, name: &str) -> Option<&TierPolicy> {
        self.tiers.get(name)
    }

    /// Look up the policy for a built-in tier class.
    pub fn tier_for(&self, class: TierClass) -> Option<&TierPolicy> {
        self.tiers.get(class.name())
    }

    /// Add or replace a tier policy.
    pub fn with_tier(mut self, name: impl Into<String>, policy: TierPolicy) -> Self {
        self.tiers.insert(name.into(), policy);
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - at least one tier is configured
    /// - every tier policy (capacity, ttl, staleness horizon)
    /// - persistence path and batch size when persistence is enabled
    /// - cleanup interval is positive
    pub fn validate(&self) -> TiplineResult<()> {
        if self.tiers.is_empty() {
            return Err(TiplineError::Config(ConfigError::MissingRequired {
                field: "tiers".to_string(),
            }));
        }

        for (name, policy) in &self.tiers {
            policy.validate(name)?;
        }

        if self.persistence.enabled {
            if self.persistence.path.as_os_str().is_empty() {
                return Err(TiplineError::Config(ConfigError::MissingRequired {
                    field: "persistence.path".to_string(),
                }));
            }

            if self.persistence.max_size_mb == 0 {
                return Err(TiplineError::Config(ConfigError::InvalidValue {
                    field: "persistence.max_size_mb".to_string(),
                    value: "0".to_string(),
                    reason: "max_size_mb must be greater than 0".to_string(),
                }));
            }

            if let PersistencePolicy::Batched { every: 0 } = self.persistence.policy {
                return Err(TiplineError::Config(ConfigError::InvalidValue {
                    field: "persistence.policy.every".to_string(),
                    value: "0".to_string(),
                    reason: "batch size must be greater than 0".to_string(),
                }));
            }
        }

        if self.maintenance.cleanup_interval.is_zero() {
            return Err(TiplineError::Config(ConfigError::InvalidValue {
                field: "maintenance.cleanup_interval_ms".to_string(),
                value: format!("{:?}", self.maintenance.cleanup_interval),
                reason: "cleanup_interval must be positive".to_string(),
            }));
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
