//! Error types for TIPLINE cache operations

use std::time::Duration;
use thiserror::Error;

/// Failures reported by a data producer (network endpoint or remote store).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {endpoint} failed with status {status}: {message}")]
    RequestFailed {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Fetch timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Data source unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Cache access errors.
///
/// A miss is not an error; `get` reports it as `None`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Producer failed for key {key}: {source}")]
    ProducerFailed { key: String, source: FetchError },

    #[error("Invalid invalidation pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unknown cache tier: {name}")]
    UnknownTier { name: String },
}

/// Errors from the durable snapshot store.
///
/// None of these are fatal to cache operations; they degrade to an empty
/// or partially restored cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Failed to open persistence environment: {0}")]
    EnvOpen(String),

    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e.to_string())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all TIPLINE errors.
#[derive(Debug, Clone, Error)]
pub enum TiplineError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for TIPLINE operations.
pub type TiplineResult<T> = Result<T, TiplineError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_fetch_error_display_request_failed() {
        let err = FetchError::RequestFailed {
            endpoint: "/api/signals".to_string(),
            status: 503,
            message: "upstream down".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("/api/signals"));
        assert!(msg.contains("503"));
        assert!(msg.contains("upstream down"));
    }

    #[test]
    fn test_producer_failed_keeps_source() {
        let err = CacheError::ProducerFailed {
            key: "odds:nba".to_string(),
            source: FetchError::Timeout {
                after: Duration::from_secs(5),
            },
        };
        let msg = format!("{}", err);
        assert!(msg.contains("odds:nba"));
        assert!(msg.contains("timed out"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_invalid_pattern_display() {
        let err = CacheError::InvalidPattern {
            pattern: "([".to_string(),
            reason: "unclosed group".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("(["));
        assert!(msg.contains("unclosed group"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "tiers.realtime.capacity".to_string(),
            value: "0".to_string(),
            reason: "capacity must be greater than 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("tiers.realtime.capacity"));
        assert!(msg.contains("greater than 0"));
    }

    #[test]
    fn test_persistence_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = PersistenceError::from(io);
        assert!(matches!(err, PersistenceError::Io(_)));
        assert!(format!("{}", err).contains("read-only"));
    }

    #[test]
    fn test_tipline_error_from_variants() {
        let cache = TiplineError::from(CacheError::UnknownTier {
            name: "odds".to_string(),
        });
        assert!(matches!(cache, TiplineError::Cache(_)));

        let fetch = TiplineError::from(FetchError::Unavailable {
            reason: "maintenance".to_string(),
        });
        assert!(matches!(fetch, TiplineError::Fetch(_)));

        let persistence = TiplineError::from(PersistenceError::Transaction("busy".to_string()));
        assert!(matches!(persistence, TiplineError::Persistence(_)));

        let config = TiplineError::from(ConfigError::MissingRequired {
            field: "persistence.path".to_string(),
        });
        assert!(matches!(config, TiplineError::Config(_)));
    }
}
