//! Job Service: the public façade — `Create`, `Get`, `Cancel`.

use std::sync::Arc;

use chrono::Utc;
use reelcut_broker::{Broker, StartMessage};
use reelcut_core::{
    ArtifactRef, ContentKind, CoreError, Job, JobId, JobStatus, JobView, ReelcutConfig, StageName, Style,
    ValidationError,
};
use reelcut_storage::{ArtifactStoreAdapter, MetadataStore};

/// Input bundle for `Create`: already-stored clip/audio artifact
/// references, supplied by the out-of-scope HTTP upload surface, plus the
/// requested audio window and style.
pub struct CreateJobInputs {
    pub clips: Vec<ArtifactRef>,
    pub audio: ArtifactRef,
    pub window: (f64, f64),
    pub style: Style,
}

pub struct JobService {
    metadata: Arc<dyn MetadataStore>,
    artifacts: Arc<ArtifactStoreAdapter>,
    broker: Arc<dyn Broker>,
    config: ReelcutConfig,
}

impl JobService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        artifacts: Arc<ArtifactStoreAdapter>,
        broker: Arc<dyn Broker>,
        config: ReelcutConfig,
    ) -> Self {
        Self { metadata, artifacts, broker, config }
    }

    /// `Create(inputs, style, window) -> job_id`. Validates clip
    /// count and content kinds, persists the `Job` row in `PENDING`, links
    /// the already-stored input artifacts, writes the window descriptor as a
    /// small JSON artifact, and enqueues a single start message.
    pub async fn create(&self, inputs: CreateJobInputs) -> Result<JobId, CoreError> {
        self.validate(&inputs)?;

        let job_id = JobId::new();
        let now = Utc::now();
        let job = Job::new(job_id, inputs.style, now);

        self.metadata.create_job(job).await?;

        for (index, clip) in inputs.clips.iter().enumerate() {
            self.link_input_artifact(job_id, &format!("clip_{index}"), clip).await?;
        }
        self.link_input_artifact(job_id, "audio", &inputs.audio).await?;

        let window_bytes = serde_json::json!({
            "start_sec": inputs.window.0,
            "end_sec": inputs.window.1,
        })
        .to_string()
        .into_bytes();
        self.artifacts
            .put(job_id, StageName::Input, "window", ContentKind::Json, window_bytes)
            .await
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;

        self.broker.send(StartMessage { job_id }).await;
        Ok(job_id)
    }

    /// `Get(job_id) -> JobView`. Read-only.
    pub async fn get(&self, job_id: JobId) -> Result<JobView, CoreError> {
        let job = self.metadata.get_job(job_id).await?;
        let output_blob_key = if let Some(output_id) = job.output_artifact_id {
            self.artifacts
                .list(job_id)
                .await
                .into_iter()
                .find(|a| a.id == output_id)
                .map(|a| a.blob_key)
        } else {
            None
        };
        Ok(JobView { job, output_blob_key })
    }

    /// `Cancel(job_id)`. Attempts the guarded transition to
    /// `CANCELLED`, allowed from `PENDING` or `PROCESSING`. Returns whether
    /// the transition was applied.
    pub async fn cancel(&self, job_id: JobId) -> Result<bool, CoreError> {
        let terminal_retention = self.config.terminal_retention;
        self.metadata
            .try_transition(
                job_id,
                JobStatus::Cancelled,
                Box::new(move |job| {
                    let now = Utc::now();
                    job.completed_at = Some(now);
                    job.retention_deadline = chrono::Duration::from_std(terminal_retention)
                        .ok()
                        .map(|delta| now + delta);
                }),
            )
            .await
    }

    async fn link_input_artifact(&self, job_id: JobId, name: &str, reference: &ArtifactRef) -> Result<(), CoreError> {
        use reelcut_core::{Artifact, ArtifactId};
        self.metadata
            .insert_artifact(Artifact {
                id: ArtifactId::new(),
                job_id,
                stage: StageName::Input,
                name: name.to_string(),
                blob_key: reference.blob_key.clone(),
                size: reference.size,
                content_kind: reference.content_kind,
                created_at: Utc::now(),
            })
            .await
    }

    fn validate(&self, inputs: &CreateJobInputs) -> Result<(), CoreError> {
        let clip_count = inputs.clips.len();
        if clip_count < 1 || clip_count > self.config.max_clip_count {
            return Err(ValidationError::ClipCountOutOfRange(clip_count, self.config.max_clip_count).into());
        }
        for clip in &inputs.clips {
            if !matches!(clip.content_kind, ContentKind::Video | ContentKind::Image) {
                return Err(ValidationError::WrongClipContentKind(clip.blob_key.clone(), clip.content_kind).into());
            }
        }
        if inputs.audio.content_kind != ContentKind::Audio {
            return Err(ValidationError::WrongAudioContentKind(inputs.audio.blob_key.clone(), inputs.audio.content_kind).into());
        }
        let (start, end) = inputs.window;
        let window_length = end - start;
        if (window_length - 30.0).abs() > 1e-6 {
            return Err(ValidationError::WindowLengthNotThirtySeconds(window_length).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcut_broker::InMemoryBroker;
    use reelcut_storage::{FilesystemBlobStore, InMemoryMetadataStore};

    fn sample_inputs() -> CreateJobInputs {
        CreateJobInputs {
            clips: vec![
                ArtifactRef { blob_key: "uploads/clip0".into(), content_kind: ContentKind::Video, size: 10 },
                ArtifactRef { blob_key: "uploads/clip1".into(), content_kind: ContentKind::Video, size: 10 },
            ],
            audio: ArtifactRef { blob_key: "uploads/audio".into(), content_kind: ContentKind::Audio, size: 10 },
            window: (0.0, 30.0),
            style: Style::EnergeticDance,
        }
    }

    fn new_service(dir: &std::path::Path) -> JobService {
        let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let blobs: Arc<dyn reelcut_storage::BlobStore> = Arc::new(FilesystemBlobStore::new(dir));
        let artifacts = Arc::new(ArtifactStoreAdapter::new(blobs, metadata.clone()));
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        JobService::new(metadata, artifacts, broker, ReelcutConfig::default())
    }

    #[tokio::test]
    async fn create_persists_pending_job_and_enqueues() {
        let dir = tempfile::tempdir().unwrap();
        let service = new_service(dir.path());
        let job_id = service.create(sample_inputs()).await.unwrap();

        let view = service.get(job_id).await.unwrap();
        assert_eq!(view.job.status, JobStatus::Pending);
        assert_eq!(view.job.attempt_count, 0);
    }

    #[tokio::test]
    async fn create_rejects_too_many_clips() {
        let dir = tempfile::tempdir().unwrap();
        let service = new_service(dir.path());
        let mut inputs = sample_inputs();
        inputs.clips = (0..10)
            .map(|i| ArtifactRef { blob_key: format!("uploads/clip{i}"), content_kind: ContentKind::Video, size: 10 })
            .collect();

        let result = service.create(inputs).await;
        assert!(matches!(result, Err(CoreError::InvalidInput(ValidationError::ClipCountOutOfRange(10, _)))));
    }

    #[tokio::test]
    async fn create_rejects_window_not_thirty_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let service = new_service(dir.path());
        let mut inputs = sample_inputs();
        inputs.window = (0.0, 10.0);

        let result = service.create(inputs).await;
        assert!(matches!(result, Err(CoreError::InvalidInput(ValidationError::WindowLengthNotThirtySeconds(_)))));
    }

    #[tokio::test]
    async fn cancel_from_pending_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let service = new_service(dir.path());
        let job_id = service.create(sample_inputs()).await.unwrap();

        assert!(service.cancel(job_id).await.unwrap());
        let view = service.get(job_id).await.unwrap();
        assert_eq!(view.job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_twice_is_rejected_the_second_time() {
        let dir = tempfile::tempdir().unwrap();
        let service = new_service(dir.path());
        let job_id = service.create(sample_inputs()).await.unwrap();

        assert!(service.cancel(job_id).await.unwrap());
        assert!(!service.cancel(job_id).await.unwrap());
    }
}
