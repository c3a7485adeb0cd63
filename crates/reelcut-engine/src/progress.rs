//! Progress Publisher: serializes stage-level progress into monotonic
//! `(percent, step)` updates on the `Job` row, coalescing high-frequency
//! callers down to one write per tick.
//!
//! `MetadataStore::update_progress` already rejects any update whose
//! progress regresses below the stored value; this type's job is purely
//! about write-rate, not ordering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reelcut_core::JobId;
use reelcut_storage::MetadataStore;

struct Pending {
    percent: u8,
    step: String,
}

/// Coalesces per-job progress updates behind a pending-value map, flushed to
/// the metadata store on a fixed tick (default 200ms) rather than on every
/// callback invocation, since this process drives many jobs concurrently
/// and the store only needs the latest value per job at tick time.
pub struct ProgressPublisher {
    metadata: Arc<dyn MetadataStore>,
    pending: Mutex<HashMap<JobId, Pending>>,
}

impl ProgressPublisher {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Arc<Self> {
        Arc::new(Self { metadata, pending: Mutex::new(HashMap::new()) })
    }

    /// Spawns the background flush loop. Returns the task handle so callers
    /// can abort it on shutdown. Only useful once something actually calls
    /// `report`; this pipeline's own updates all land at stage boundaries
    /// and go through `publish_now` instead, so the binary does not wire
    /// this up today.
    pub fn spawn_flusher(self: &Arc<Self>, tick: Duration) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                this.flush().await;
            }
        })
    }

    /// Queues a progress update for the next flush tick. Last writer for a
    /// given job wins within one tick window.
    pub fn report(&self, job_id: JobId, percent: u8, step: impl Into<String>) {
        self.pending.lock().insert(job_id, Pending { percent, step: step.into() });
    }

    /// Drains and writes every pending update. Exposed so tests and the
    /// Pipeline Executor's stage-boundary reporting (which wants progress
    /// visible before the next stage dispatches, not just eventually) can
    /// force a flush instead of waiting for the tick.
    pub async fn flush(&self) {
        let batch: Vec<(JobId, Pending)> = self.pending.lock().drain().collect();
        for (job_id, pending) in batch {
            if let Err(err) = self.metadata.update_progress(job_id, pending.percent, &pending.step).await {
                tracing::warn!(%job_id, %err, "progress publisher: update_progress failed");
            }
        }
    }

    /// Reports and immediately flushes just that job's update, bypassing
    /// coalescing. Used at stage boundaries in the Pipeline Executor, where
    /// each update is already rate-limited to one per completed stage.
    pub async fn publish_now(&self, job_id: JobId, percent: u8, step: impl Into<String>) {
        let step = step.into();
        self.pending.lock().remove(&job_id);
        if let Err(err) = self.metadata.update_progress(job_id, percent, &step).await {
            tracing::warn!(%job_id, %err, "progress publisher: update_progress failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcut_core::{Job, Style};
    use reelcut_storage::InMemoryMetadataStore;

    async fn new_job(metadata: &Arc<dyn MetadataStore>) -> JobId {
        let job = Job::new(JobId::new(), Style::EnergeticDance, chrono::Utc::now());
        let id = job.id;
        metadata.create_job(job).await.unwrap();
        id
    }

    #[tokio::test]
    async fn flush_writes_the_latest_pending_value() {
        let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let job_id = new_job(&metadata).await;
        let publisher = ProgressPublisher::new(metadata.clone());

        publisher.report(job_id, 10, "audio_slice");
        publisher.report(job_id, 25, "beats");
        publisher.flush().await;

        let job = metadata.get_job(job_id).await.unwrap();
        assert_eq!(job.progress, 25);
        assert_eq!(job.current_step, "beats");
    }

    #[tokio::test]
    async fn publish_now_bypasses_coalescing() {
        let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let job_id = new_job(&metadata).await;
        let publisher = ProgressPublisher::new(metadata.clone());

        publisher.publish_now(job_id, 40, "plan").await;
        let job = metadata.get_job(job_id).await.unwrap();
        assert_eq!(job.progress, 40);
    }
}
