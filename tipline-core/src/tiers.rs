//! Named cache tier table.
//!
//! Each data class the dashboard caches gets its own tier with a default
//! TTL that reflects how volatile the data is. The mapping is data, not
//! logic: `CacheConfig::default()` builds its tier policies from
//! [`DEFAULT_TIERS`] and a TOML file can override any row.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Semantic data class served by a cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierClass {
    /// Live odds, in-play signal feeds.
    Realtime,
    /// Settled results and past performance series.
    Historical,
    /// Feature flags, plan limits, admin-edited settings.
    Configuration,
    /// Per-user profile and subscription data.
    User,
    /// Computed betting signals and their confidence scores.
    Signals,
}

impl TierClass {
    pub const ALL: [TierClass; 5] = [
        TierClass::Realtime,
        TierClass::Historical,
        TierClass::Configuration,
        TierClass::User,
        TierClass::Signals,
    ];

    /// Tier name used as the configuration key and persistence database name.
    pub fn name(self) -> &'static str {
        match self {
            TierClass::Realtime => "realtime",
            TierClass::Historical => "historical",
            TierClass::Configuration => "configuration",
            TierClass::User => "user",
            TierClass::Signals => "signals",
        }
    }
}

impl fmt::Display for TierClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TierClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TierClass::ALL
            .into_iter()
            .find(|class| class.name() == s)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "tier".to_string(),
                value: s.to_string(),
                reason: "not a known tier class".to_string(),
            })
    }
}

/// One row of the default tier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSpec {
    pub class: TierClass,
    pub default_ttl: Duration,
    pub capacity: usize,
    /// Staleness horizon for stale-while-revalidate reads.
    pub stale_after: Option<Duration>,
}

/// Default TTL, capacity and staleness per data class.
pub const DEFAULT_TIERS: &[TierSpec] = &[
    TierSpec {
        class: TierClass::Realtime,
        default_ttl: Duration::from_secs(30),
        capacity: 500,
        stale_after: Some(Duration::from_secs(10)),
    },
    TierSpec {
        class: TierClass::Historical,
        default_ttl: Duration::from_secs(15 * 60),
        capacity: 1_000,
        stale_after: Some(Duration::from_secs(5 * 60)),
    },
    TierSpec {
        class: TierClass::Configuration,
        default_ttl: Duration::from_secs(60 * 60),
        capacity: 100,
        stale_after: None,
    },
    TierSpec {
        class: TierClass::User,
        default_ttl: Duration::from_secs(5 * 60),
        capacity: 200,
        stale_after: Some(Duration::from_secs(60)),
    },
    TierSpec {
        class: TierClass::Signals,
        default_ttl: Duration::from_secs(60),
        capacity: 1_000,
        stale_after: Some(Duration::from_secs(20)),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_every_class_has_a_default_row() {
        for class in TierClass::ALL {
            assert!(
                DEFAULT_TIERS.iter().any(|spec| spec.class == class),
                "missing default tier for {class}"
            );
        }
        assert_eq!(DEFAULT_TIERS.len(), TierClass::ALL.len());
    }

    #[test]
    fn test_default_staleness_inside_ttl() {
        for spec in DEFAULT_TIERS {
            if let Some(stale_after) = spec.stale_after {
                assert!(stale_after < spec.default_ttl, "{}", spec.class);
            }
            assert!(spec.capacity > 0);
        }
    }

    #[test]
    fn test_realtime_is_shortest_lived() {
        let realtime = DEFAULT_TIERS
            .iter()
            .find(|s| s.class == TierClass::Realtime)
            .unwrap();
        assert!(DEFAULT_TIERS
            .iter()
            .all(|s| s.default_ttl >= realtime.default_ttl));
    }

    #[test]
    fn test_unknown_tier_name_rejected() {
        assert!("odds".parse::<TierClass>().is_err());
    }

    proptest! {
        #[test]
        fn prop_tier_name_round_trips(idx in 0usize..5) {
            let class = TierClass::ALL[idx];
            prop_assert_eq!(class.name().parse::<TierClass>().unwrap(), class);
        }
    }
}
