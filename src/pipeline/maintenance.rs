//! Scheduled maintenance
//!
//! Three independent fixed-interval loops run alongside the worker pool:
//! a cleanup of finished task records, a health probe, and a retry sweep
//! for failed tasks whose scheduled retry was lost. None of them assume
//! exclusive access to the stores they touch.

use super::ProcessingCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Finished tasks are kept for this many maintenance intervals before the
/// cleanup loop drops them
const CLEANUP_RETENTION_INTERVALS: i64 = 12;

pub(super) fn spawn(coordinator: Arc<ProcessingCoordinator>) -> Vec<JoinHandle<()>> {
    let interval_secs = coordinator
        .ctx
        .config
        .worker
        .maintenance_interval_secs
        .max(1);
    let interval = Duration::from_secs(interval_secs);

    vec![
        tokio::spawn(cleanup_loop(Arc::clone(&coordinator), interval)),
        tokio::spawn(health_loop(Arc::clone(&coordinator), interval)),
        tokio::spawn(retry_sweep_loop(coordinator, interval)),
    ]
}

async fn cleanup_loop(coordinator: Arc<ProcessingCoordinator>, interval: Duration) {
    let retention = chrono::Duration::seconds(
        interval.as_secs() as i64 * CLEANUP_RETENTION_INTERVALS,
    );
    let mut ticker = tokio::time::interval(interval * CLEANUP_RETENTION_INTERVALS as u32);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let removed = coordinator.cleanup_finished_tasks(retention).await;
        if removed > 0 {
            debug!(removed, "Cleaned up finished task records");
        }
    }
}

async fn health_loop(coordinator: Arc<ProcessingCoordinator>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let report = coordinator.health_check().await;
        if report.healthy {
            debug!("Health probe: all subsystems ok");
        } else {
            for (name, status) in &report.subsystems {
                if !status.starts_with("ok") {
                    warn!(subsystem = %name, %status, "Health probe failure");
                }
            }
        }
    }
}

async fn retry_sweep_loop(coordinator: Arc<ProcessingCoordinator>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        coordinator.retry_sweep().await;
    }
}
