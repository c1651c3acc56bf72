//! Cache Cleanup Background Task
//!
//! Lazy expiration only removes entries that are read again. Keys that are
//! written once and never read would otherwise sit in a store until they
//! are evicted, so this task sweeps every tier on a fixed interval.
//!
//! # Configuration
//!
//! The interval comes from `CacheConfig::maintenance`:
//!
//! ```toml
//! [maintenance]
//! cleanup_interval_ms = 60000
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tipline_core::MaintenanceConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::tiers::CacheTiers;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for cleanup activity since the task started.
#[derive(Debug, Default)]
pub struct CleanupMetrics {
    /// Total cleanup cycles completed
    pub cleanup_cycles: AtomicU64,

    /// Total expired entries removed across all tiers
    pub entries_removed: AtomicU64,
}

impl CleanupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> CleanupSnapshot {
        CleanupSnapshot {
            cleanup_cycles: self.cleanup_cycles.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cleanup metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSnapshot {
    pub cleanup_cycles: u64,
    pub entries_removed: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that periodically removes expired entries from every tier.
///
/// Runs until `shutdown_rx` observes `true` (or its sender is dropped) and
/// returns the metrics collected during its lifetime.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = spawn_cleanup(tiers.clone(), config.maintenance.clone(), shutdown_rx);
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn cleanup_task<V>(
    tiers: CacheTiers<V>,
    config: MaintenanceConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<CleanupMetrics>
where
    V: Clone + Send + Sync + 'static,
{
    let metrics = Arc::new(CleanupMetrics::new());

    let mut cleanup_interval = interval(config.cleanup_interval);
    cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        cleanup_interval_ms = config.cleanup_interval.as_millis() as u64,
        tiers = tiers.len(),
        "Cache cleanup task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache cleanup task shutting down");
                    break;
                }
            }

            _ = cleanup_interval.tick() => {
                run_cycle(&tiers, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cleanup_cycles = snapshot.cleanup_cycles,
        entries_removed = snapshot.entries_removed,
        "Cache cleanup task completed"
    );

    metrics
}

/// Spawn [`cleanup_task`] on the current tokio runtime.
pub fn spawn_cleanup<V>(
    tiers: CacheTiers<V>,
    config: MaintenanceConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<Arc<CleanupMetrics>>
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(cleanup_task(tiers, config, shutdown_rx))
}

/// Perform one sweep over all tiers.
fn run_cycle<V>(tiers: &CacheTiers<V>, metrics: &CleanupMetrics)
where
    V: Clone + Send + Sync + 'static,
{
    metrics.cleanup_cycles.fetch_add(1, Ordering::Relaxed);

    let mut total = 0usize;
    for (name, cache) in tiers.iter() {
        let removed = cache.cleanup();
        if removed > 0 {
            tracing::debug!(tier = %name, removed, "Removed expired entries");
        }
        total += removed;
    }

    if total > 0 {
        metrics
            .entries_removed
            .fetch_add(total as u64, Ordering::Relaxed);
        tracing::info!(removed = total, "Cache cleanup cycle completed");
    } else {
        tracing::trace!("Cache cleanup cycle completed with no expired entries");
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tipline_core::CacheConfig;

    use crate::cache::store::EntryOptions;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = CleanupMetrics::new();
        metrics.cleanup_cycles.store(4, Ordering::Relaxed);
        metrics.entries_removed.store(9, Ordering::Relaxed);

        assert_eq!(
            metrics.snapshot(),
            CleanupSnapshot {
                cleanup_cycles: 4,
                entries_removed: 9,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_sweeps_until_shutdown() {
        let tiers: CacheTiers<String> = CacheTiers::from_config(&CacheConfig::default()).unwrap();
        let realtime = tiers.tier("realtime").unwrap().clone();
        realtime.set("a", "1".to_string(), EntryOptions::new().ttl(Duration::from_secs(5)));
        realtime.set("b", "2".to_string(), EntryOptions::new().ttl(Duration::from_secs(5)));

        let config = MaintenanceConfig {
            cleanup_interval: Duration::from_secs(10),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_cleanup(tiers, config, shutdown_rx);

        // First tick fires immediately; the entries are still live then.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(realtime.store().len(), 0);

        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap().snapshot();
        assert_eq!(metrics.entries_removed, 2);
        assert!(metrics.cleanup_cycles >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_stops_when_sender_dropped() {
        let tiers: CacheTiers<String> = CacheTiers::from_config(&CacheConfig::default()).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_cleanup(tiers, MaintenanceConfig::default(), shutdown_rx);

        drop(shutdown_tx);
        let metrics = handle.await.unwrap().snapshot();
        assert_eq!(metrics.entries_removed, 0);
    }
}
