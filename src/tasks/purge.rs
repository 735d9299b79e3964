//! Expired Entry Purge Task
//!
//! Background task that periodically purges expired entries from the remote
//! store. Expired entries are already invisible to readers; purging reclaims
//! the space they and their set tags occupy.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::CacheEngine;

/// Spawns a background task that calls [`CacheEngine::purge`] every
/// `purge_interval_secs` seconds.
///
/// The engine logs each run and reports store failures itself, so the loop
/// never ends on its own. Abort the returned handle during shutdown.
///
/// # Example
/// ```ignore
/// let engine = Arc::new(CacheEngine::from_config(store, &config));
/// let purge_handle = spawn_purge_task(engine.clone(), 60);
/// // Later, during shutdown:
/// purge_handle.abort();
/// ```
pub fn spawn_purge_task(engine: Arc<CacheEngine>, purge_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(purge_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting purge task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;
            engine.purge().await;
        }
    })
}
