use std::sync::Arc;

use chrono::Utc;
use reelcut_core::{Artifact, ArtifactId, ContentKind, CoreError, JobId, JobStatus, StageName};

use crate::blob::{BlobError, BlobStore};
use crate::metadata::MetadataStore;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactStoreError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("job {0} is in a terminal state and accepts no further writes")]
    JobTerminal(JobId),
}

/// Typed wrapper over the blob store: namespaces artifacts under
/// `{job_id}/{stage}/{name}` and records every write in the metadata store
/// as an `Artifact` row.
pub struct ArtifactStoreAdapter {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl ArtifactStoreAdapter {
    pub fn new(blobs: Arc<dyn BlobStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { blobs, metadata }
    }

    fn blob_key(job_id: JobId, stage: StageName, name: &str) -> String {
        format!("{job_id}/{stage}/{name}")
    }

    /// Writes `data` as the named output of `stage` for `job_id`, refusing
    /// the write if the job does not exist or has reached a terminal
    /// status.
    pub async fn put(
        &self,
        job_id: JobId,
        stage: StageName,
        name: &str,
        content_kind: ContentKind,
        data: Vec<u8>,
    ) -> Result<Artifact, ArtifactStoreError> {
        let job = self.metadata.get_job(job_id).await?;
        if job.status == JobStatus::Failed || job.status == JobStatus::Cancelled {
            return Err(ArtifactStoreError::JobTerminal(job_id));
        }

        let key = Self::blob_key(job_id, stage, name);
        let size = data.len() as u64;
        self.blobs.put(&key, data).await?;

        let artifact = Artifact {
            id: ArtifactId::new(),
            job_id,
            stage,
            name: name.to_string(),
            blob_key: key,
            size,
            content_kind,
            created_at: Utc::now(),
        };
        self.metadata.insert_artifact(artifact.clone()).await?;
        Ok(artifact)
    }

    pub async fn get(&self, job_id: JobId, stage: StageName, name: &str) -> Result<Vec<u8>, ArtifactStoreError> {
        let artifact = self
            .metadata
            .get_artifact(job_id, stage, name)
            .await
            .ok_or(CoreError::JobNotFound(job_id))?;
        Ok(self.blobs.get(&artifact.blob_key).await?)
    }

    pub async fn list(&self, job_id: JobId) -> Vec<Artifact> {
        self.metadata.list_artifacts(job_id).await
    }

    /// Deletes every artifact belonging to `job_id`: blobs first, then rows
    ///.
    pub async fn delete_all(&self, job_id: JobId) -> Result<(), ArtifactStoreError> {
        let artifacts = self.metadata.list_artifacts(job_id).await;
        for artifact in &artifacts {
            self.blobs.delete(&artifact.blob_key).await?;
        }
        self.metadata.delete_artifacts(job_id).await?;
        Ok(())
    }

    /// Deletes only the artifacts produced by `stage` (used when a
    /// cancelled/cancelled-sibling stage leaves partial output behind, spec
    /// §5 "partial artifacts for cancelled stages are deleted").
    pub async fn delete_stage(&self, job_id: JobId, stage: StageName) -> Result<(), ArtifactStoreError> {
        let artifacts: Vec<_> = self
            .metadata
            .list_artifacts(job_id)
            .await
            .into_iter()
            .filter(|a| a.stage == stage)
            .collect();
        for artifact in &artifacts {
            self.blobs.delete(&artifact.blob_key).await?;
            self.metadata.delete_artifact(job_id, artifact.stage, &artifact.name).await;
        }
        Ok(())
    }
}
