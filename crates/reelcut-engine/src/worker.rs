//! Worker: the single consumer loop per process. Pulls a start
//! message, picks up the job under a CAS guard, drives it through the
//! Pipeline Executor, and resolves the message and the job's terminal state
//! according to the outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reelcut_broker::Broker;
use reelcut_core::{JobError, JobId, JobStatus, ReelcutConfig, StageName};
use reelcut_storage::{ArtifactStoreAdapter, MetadataStore};

use crate::error::PipelineOutcome;
use crate::pipeline::PipelineExecutor;
use crate::progress::ProgressPublisher;
use crate::shutdown::Shutdown;

/// What the Worker does with the broker message once a job pickup has been
/// resolved. `Ack` covers success, terminal failure, and cancellation; `Nack`
/// covers a retryable failure still under `max_attempts`, redelivered after
/// the exponential backoff delay (spec §4.2).
enum Resolution {
    Ack,
    Nack(Duration),
}

pub struct Worker {
    metadata: Arc<dyn MetadataStore>,
    broker: Arc<dyn Broker>,
    pipeline: Arc<PipelineExecutor>,
    progress: Arc<ProgressPublisher>,
    config: ReelcutConfig,
}

impl Worker {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        broker: Arc<dyn Broker>,
        pipeline: Arc<PipelineExecutor>,
        progress: Arc<ProgressPublisher>,
        config: ReelcutConfig,
    ) -> Self {
        Self { metadata, broker, pipeline, progress, config }
    }

    /// Runs the consume loop until `shutdown` is requested. One job at a
    /// time: horizontal scale is one process per worker, not one task per
    /// job within a process.
    pub async fn run(&self, shutdown: Arc<Shutdown>) {
        loop {
            if shutdown.is_requested() {
                return;
            }

            let received = tokio::select! {
                received = self.broker.receive(self.config.visibility_timeout) => received,
                _ = shutdown.wait() => return,
            };

            let Some((message, receipt)) = received else {
                continue;
            };

            match self.process_one(message.job_id).await {
                Resolution::Ack => self.broker.ack(receipt).await,
                Resolution::Nack(delay) => self.broker.nack(receipt, delay).await,
            }
        }
    }

    /// Picks up and fully drives one job, or no-ops (ACKing the message) if
    /// it was already resolved by another worker: at-least-once delivery
    /// means the same message may be redelivered after a worker crash.
    async fn process_one(&self, job_id: JobId) -> Resolution {
        let job = match self.metadata.get_job(job_id).await {
            Ok(job) => job,
            Err(err) => {
                tracing::warn!(%job_id, %err, "worker: job not found for delivered message, dropping");
                return Resolution::Ack;
            }
        };

        if job.status.is_terminal() {
            tracing::debug!(%job_id, status = %job.status, "worker: job already resolved, skipping");
            return Resolution::Ack;
        }

        let picked_up = self
            .metadata
            .try_transition(
                job_id,
                JobStatus::Processing,
                Box::new(|job| {
                    job.attempt_count += 1;
                    job.last_pickup_at = Some(Utc::now());
                }),
            )
            .await;

        match picked_up {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(%job_id, "worker: lost pickup race or job not pending/processing, skipping");
                return Resolution::Ack;
            }
            Err(err) => {
                tracing::warn!(%job_id, %err, "worker: pickup transition failed");
                return Resolution::Ack;
            }
        }

        self.progress.publish_now(job_id, 0, "processing").await;
        let outcome = self.pipeline.run(job_id).await;
        self.resolve(job_id, outcome).await
    }

    async fn resolve(&self, job_id: JobId, outcome: PipelineOutcome) -> Resolution {
        match outcome {
            PipelineOutcome::Completed => {
                self.resolve_completed(job_id).await;
                Resolution::Ack
            }
            PipelineOutcome::StageCancelled { stage } => {
                self.resolve_cancelled(job_id, stage).await;
                Resolution::Ack
            }
            PipelineOutcome::StageFailed { stage, error } => self.resolve_failed(job_id, stage, error).await,
        }
    }

    async fn resolve_completed(&self, job_id: JobId) {
        let output = self.metadata.get_artifact(job_id, StageName::QualityGate, "muxed").await.map(|a| a.id);
        let terminal_retention = self.config.terminal_retention;

        let applied = self
            .metadata
            .try_transition(
                job_id,
                JobStatus::Completed,
                Box::new(move |job| {
                    let now = Utc::now();
                    job.completed_at = Some(now);
                    job.output_artifact_id = output;
                    job.retention_deadline = chrono::Duration::from_std(terminal_retention).ok().map(|d| now + d);
                }),
            )
            .await;
        if !matches!(applied, Ok(true)) {
            tracing::warn!(%job_id, "worker: could not transition completed job (already terminal?)");
        }
    }

    async fn resolve_cancelled(&self, job_id: JobId, stage: StageName) {
        tracing::info!(%job_id, %stage, "worker: job cancelled mid-pipeline");
        let terminal_retention = self.config.terminal_retention;
        let _ = self
            .metadata
            .try_transition(
                job_id,
                JobStatus::Cancelled,
                Box::new(move |job| {
                    let now = Utc::now();
                    job.completed_at = Some(now);
                    job.retention_deadline = chrono::Duration::from_std(terminal_retention).ok().map(|d| now + d);
                }),
            )
            .await;
    }

    /// Retries a retryable failure under `max_attempts` by NACKing with
    /// exponential backoff; otherwise records the terminal failure on the
    /// job. The job stays `Processing` while the retry is pending — there is
    /// no `Processing -> Pending` edge in the state machine's table, so the
    /// NACK-then-redeliver path relies entirely on the `Processing ->
    /// Processing` re-entry a redelivered message takes on pickup.
    async fn resolve_failed(&self, job_id: JobId, stage: StageName, error: crate::error::StageError) -> Resolution {
        let kind = error.error_kind();
        let job = match self.metadata.get_job(job_id).await {
            Ok(job) => job,
            Err(err) => {
                tracing::warn!(%job_id, %err, "worker: failed job vanished before resolution");
                return Resolution::Ack;
            }
        };

        if kind.retryable() && job.attempt_count < self.config.max_attempts {
            let delay = self.config.retry_backoff(job.attempt_count);
            tracing::warn!(%job_id, %stage, attempt = job.attempt_count, ?delay, "worker: retryable stage failure, will retry");
            return Resolution::Nack(delay);
        }

        tracing::error!(%job_id, %stage, ?kind, "worker: fatal stage failure, job failed");
        let terminal_retention = self.config.terminal_retention;
        let job_error = JobError::new(kind, Some(stage), error.message());
        let _ = self
            .metadata
            .try_transition(
                job_id,
                JobStatus::Failed,
                Box::new(move |job| {
                    let now = Utc::now();
                    job.completed_at = Some(now);
                    job.error = Some(job_error);
                    job.retention_deadline = chrono::Duration::from_std(terminal_retention).ok().map(|d| now + d);
                }),
            )
            .await;
        Resolution::Ack
    }
}
