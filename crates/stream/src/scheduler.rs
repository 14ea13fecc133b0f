//! Background maintenance for the room store.
//!
//! Periodically evicts idle rooms and rotates saves to disk. On shutdown it
//! persists every room, empty ones included.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::store::{StreamStore, SweepReport};

/// Spawn the background maintenance loop.
///
/// The loop runs until `shutdown` is cancelled, then flushes every room
/// before the returned handle completes.
pub fn spawn_scheduler(store: Arc<StreamStore>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run(store, shutdown))
}

async fn run(store: Arc<StreamStore>, shutdown: CancellationToken) {
    let interval = store.config().check_interval();
    info!(interval_ms = interval.as_millis() as u64, "Room scheduler started");

    while !shutdown.is_cancelled() {
        if let Some(report) = sweep_once(&store).await {
            debug!(
                evicted = report.evicted.len(),
                saved = report.saved,
                failures = report.failures,
                "Sweep finished"
            );
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    let flush_store = Arc::clone(&store);
    match tokio::task::spawn_blocking(move || flush_store.flush_all()).await {
        Ok(Ok(saved)) => info!(saved, "Saved all rooms on shutdown"),
        Ok(Err(e)) => error!(error = %e, "Failed to save rooms on shutdown"),
        Err(e) => error!(error = %e, "Shutdown save task failed"),
    }
}

/// Run one sweep off the async workers. A panicking sweep is logged and
/// the loop carries on.
pub async fn sweep_once(store: &Arc<StreamStore>) -> Option<SweepReport> {
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.sweep()).await {
        Ok(report) => Some(report),
        Err(e) => {
            error!(error = %e, "Failed during scheduled background work");
            None
        }
    }
}
