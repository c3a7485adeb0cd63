//! Scheduler: a single background task that drives the
//! Retention Reaper's sweep and the abandoned-job requeue scan on their own
//! fixed intervals, multiplexed together with `select!` over two
//! independent `interval` timers.

use std::sync::Arc;
use std::time::Duration;

use reelcut_broker::Broker;

use crate::reaper::RetentionReaper;
use crate::shutdown::Shutdown;

/// Interval for the abandoned-job requeue scan. Unlike the reaper sweep
/// interval, this one has no dedicated env override; a minute is
/// conservative relative to the default 15 minute visibility timeout it
/// complements.
const REQUEUE_SCAN_INTERVAL: Duration = Duration::from_secs(60);

pub struct Scheduler {
    reaper: Arc<RetentionReaper>,
    broker: Arc<dyn Broker>,
    reaper_interval: Duration,
}

impl Scheduler {
    pub fn new(reaper: Arc<RetentionReaper>, broker: Arc<dyn Broker>, reaper_interval: Duration) -> Self {
        Self { reaper, broker, reaper_interval }
    }

    /// Runs both periodic scans until `shutdown` is requested.
    pub async fn run(&self, shutdown: Arc<Shutdown>) {
        let mut reaper_tick = tokio::time::interval(self.reaper_interval);
        let mut requeue_tick = tokio::time::interval(REQUEUE_SCAN_INTERVAL);
        reaper_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        requeue_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = reaper_tick.tick() => {
                    let reaped = self.reaper.sweep().await;
                    if reaped > 0 {
                        tracing::info!(reaped, "scheduler: retention sweep reclaimed jobs");
                    }
                }
                _ = requeue_tick.tick() => {
                    let requeued = self.reaper.requeue_abandoned(self.broker.as_ref()).await;
                    if requeued > 0 {
                        tracing::info!(requeued, "scheduler: requeue scan resent abandoned jobs");
                    }
                }
                _ = shutdown.wait() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcut_broker::InMemoryBroker;
    use reelcut_core::ReelcutConfig;
    use reelcut_storage::{ArtifactStoreAdapter, BlobStore, FilesystemBlobStore, InMemoryMetadataStore, MetadataStore};

    #[tokio::test]
    async fn run_stops_promptly_once_shutdown_is_requested() {
        let dir = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path()));
        let artifacts = Arc::new(ArtifactStoreAdapter::new(blobs, metadata.clone()));
        let reaper = Arc::new(RetentionReaper::new(metadata, artifacts, ReelcutConfig::default()));
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let scheduler = Scheduler::new(reaper, broker, Duration::from_secs(600));

        let shutdown = Shutdown::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { scheduler.run(shutdown).await }
        });

        shutdown.request();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
