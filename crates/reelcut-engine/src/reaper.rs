//! Retention Reaper: deletes a job's artifacts and row once its
//! retention deadline has passed. Runs as a fixed-interval sweep rather than
//! per-job timers, trading prompt reclamation for one predictable
//! background task instead of one timer per job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reelcut_broker::Broker;
use reelcut_core::{Job, JobStatus, ReelcutConfig};
use reelcut_storage::{ArtifactStoreAdapter, MetadataStore};

pub struct RetentionReaper {
    metadata: Arc<dyn MetadataStore>,
    artifacts: Arc<ArtifactStoreAdapter>,
    config: ReelcutConfig,
}

impl RetentionReaper {
    pub fn new(metadata: Arc<dyn MetadataStore>, artifacts: Arc<ArtifactStoreAdapter>, config: ReelcutConfig) -> Self {
        Self { metadata, artifacts, config }
    }

    /// The retention horizon for a job: terminal jobs are kept
    /// for `terminal_retention` past `completed_at`; non-terminal jobs that
    /// never reached a terminal state (e.g. stuck mid-pipeline forever) are
    /// kept for `abandoned_retention` past `created_at`.
    fn horizon_for(&self, job: &Job) -> DateTime<Utc> {
        match job.completed_at {
            Some(completed_at) => completed_at + to_chrono(self.config.terminal_retention),
            None => job.created_at + to_chrono(self.config.abandoned_retention),
        }
    }

    fn is_due(&self, job: &Job, now: DateTime<Utc>) -> bool {
        if let Some(deadline) = job.retention_deadline {
            return deadline <= now;
        }
        self.horizon_for(job) <= now
    }

    /// One sweep: scans every job, deletes artifacts and the job row for
    /// every job past its retention horizon. Idempotent — a job already
    /// deleted by a concurrent sweep is simply absent from the next scan.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let jobs = self.metadata.list_jobs().await;
        let mut reaped = 0;

        for job in jobs {
            if !self.is_due(&job, now) {
                continue;
            }
            if let Err(err) = self.artifacts.delete_all(job.id).await {
                tracing::warn!(job_id = %job.id, %err, "reaper: failed to delete artifacts, will retry next sweep");
                continue;
            }
            if let Err(err) = self.metadata.delete_job(job.id).await {
                tracing::warn!(job_id = %job.id, %err, "reaper: failed to delete job row, will retry next sweep");
                continue;
            }
            tracing::info!(job_id = %job.id, "reaper: reclaimed job past its retention horizon");
            reaped += 1;
        }
        reaped
    }

    /// Requeues jobs stuck in `Processing` past their visibility timeout
    /// plus slack: the worker-crash recovery path, implemented here since it
    /// shares the reaper's scan rather than needing its own collaborator.
    pub async fn requeue_abandoned(&self, broker: &dyn Broker) -> usize {
        let now = Utc::now();
        let threshold = to_chrono(self.config.visibility_timeout + self.config.visibility_slack);
        let jobs = self.metadata.list_jobs().await;
        let mut requeued = 0;

        for job in jobs {
            if job.status != JobStatus::Processing {
                continue;
            }
            let Some(last_pickup_at) = job.last_pickup_at else { continue };
            if last_pickup_at + threshold > now {
                continue;
            }

            broker.send(reelcut_broker::StartMessage { job_id: job.id }).await;
            tracing::warn!(job_id = %job.id, "scheduler: requeued job abandoned by a crashed worker");
            requeued += 1;
        }
        requeued
    }
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcut_broker::{Broker, InMemoryBroker};
    use reelcut_core::{ContentKind, JobId, StageName, Style};
    use reelcut_storage::{BlobStore, FilesystemBlobStore, InMemoryMetadataStore};
    use std::time::Duration;

    fn new_config() -> ReelcutConfig {
        ReelcutConfig { terminal_retention: Duration::from_secs(1), abandoned_retention: Duration::from_secs(1), ..ReelcutConfig::default() }
    }

    async fn harness() -> (RetentionReaper, Arc<dyn MetadataStore>, Arc<ArtifactStoreAdapter>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path()));
        let artifacts = Arc::new(ArtifactStoreAdapter::new(blobs, metadata.clone()));
        let reaper = RetentionReaper::new(metadata.clone(), artifacts.clone(), new_config());
        (reaper, metadata, artifacts, dir)
    }

    #[tokio::test]
    async fn sweep_reclaims_a_job_past_its_terminal_retention() {
        let (reaper, metadata, artifacts, _dir) = harness().await;
        let job = Job::new(JobId::new(), Style::EnergeticDance, Utc::now() - chrono::Duration::hours(2));
        let job_id = job.id;
        metadata.create_job(job).await.unwrap();
        metadata
            .try_transition(
                job_id,
                JobStatus::Processing,
                Box::new(|_| {}),
            )
            .await
            .unwrap();
        metadata
            .try_transition(
                job_id,
                JobStatus::Completed,
                Box::new(|job| job.completed_at = Some(Utc::now() - chrono::Duration::hours(1))),
            )
            .await
            .unwrap();
        artifacts.put(job_id, StageName::QualityGate, "muxed", ContentKind::Video, b"x".to_vec()).await.unwrap();

        let reaped = reaper.sweep().await;
        assert_eq!(reaped, 1);
        assert!(metadata.get_job(job_id).await.is_err());
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_jobs_alone() {
        let (reaper, metadata, _artifacts, _dir) = harness().await;
        let job = Job::new(JobId::new(), Style::EnergeticDance, Utc::now());
        let job_id = job.id;
        metadata.create_job(job).await.unwrap();

        let reaped = reaper.sweep().await;
        assert_eq!(reaped, 0);
        assert!(metadata.get_job(job_id).await.is_ok());
    }

    #[tokio::test]
    async fn requeue_abandoned_resends_stale_processing_jobs() {
        let (reaper, metadata, _artifacts, _dir) = harness().await;
        let job = Job::new(JobId::new(), Style::EnergeticDance, Utc::now());
        let job_id = job.id;
        metadata.create_job(job).await.unwrap();
        metadata
            .try_transition(
                job_id,
                JobStatus::Processing,
                Box::new(|job| job.last_pickup_at = Some(Utc::now() - chrono::Duration::hours(1))),
            )
            .await
            .unwrap();

        let broker = InMemoryBroker::new();
        let requeued = reaper.requeue_abandoned(&broker).await;
        assert_eq!(requeued, 1);
        assert!(broker.receive(Duration::from_secs(60)).await.is_some());
    }
}
