use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reelcut_core::{Artifact, ArtifactId, CoreError, Job, JobId, JobStatus, StageName, state_machine};

/// The metadata store collaborator: a transactional key/row store
/// holding `Job` and `Artifact` records. All `Job.status` writes go through
/// `try_transition`, which performs the state-machine guard check and the
/// compare-and-set atomically.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_job(&self, job: Job) -> Result<(), CoreError>;
    async fn get_job(&self, id: JobId) -> Result<Job, CoreError>;
    async fn delete_job(&self, id: JobId) -> Result<(), CoreError>;
    async fn list_jobs(&self) -> Vec<Job>;

    /// Attempts the guarded transition `from -> to`. On success, applies
    /// `mutate` to the stored job (e.g. to set `error`/`output_artifact_id`
    /// in the same "transaction") and returns `true`. Returns `false` if the
    /// guard rejected the transition (e.g. lost a pickup race) without
    /// calling `mutate` and without error: losing a race is an expected
    /// outcome, not a failure.
    async fn try_transition(
        &self,
        id: JobId,
        to: JobStatus,
        mutate: Box<dyn FnOnce(&mut Job) + Send>,
    ) -> Result<bool, CoreError>;

    /// Updates `progress`/`current_step` only if `progress` is not less than
    /// the stored value.
    /// Returns `true` if the update was applied.
    async fn update_progress(&self, id: JobId, progress: u8, step: &str) -> Result<bool, CoreError>;

    async fn insert_artifact(&self, artifact: Artifact) -> Result<(), CoreError>;
    async fn list_artifacts(&self, job_id: JobId) -> Vec<Artifact>;
    async fn get_artifact(&self, job_id: JobId, stage: StageName, name: &str) -> Option<Artifact>;
    async fn delete_artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>, CoreError>;
    /// Removes a single artifact row (name, stage) from the job's bucket.
    async fn delete_artifact(&self, job_id: JobId, stage: StageName, name: &str);
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    artifacts: HashMap<JobId, Vec<Artifact>>,
}

/// Reference in-memory implementation, guarded by a single `parking_lot`
/// mutex.
pub struct InMemoryMetadataStore {
    state: Mutex<State>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn create_job(&self, job: Job) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        state.artifacts.entry(job.id).or_default();
        state.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, CoreError> {
        self.state.lock().jobs.get(&id).cloned().ok_or(CoreError::JobNotFound(id))
    }

    async fn delete_job(&self, id: JobId) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        state.jobs.remove(&id);
        state.artifacts.remove(&id);
        Ok(())
    }

    async fn list_jobs(&self) -> Vec<Job> {
        self.state.lock().jobs.values().cloned().collect()
    }

    async fn try_transition(
        &self,
        id: JobId,
        to: JobStatus,
        mutate: Box<dyn FnOnce(&mut Job) + Send>,
    ) -> Result<bool, CoreError> {
        let mut state = self.state.lock();
        let job = state.jobs.get_mut(&id).ok_or(CoreError::JobNotFound(id))?;
        if !state_machine::transition(job.status, to) {
            return Ok(false);
        }
        job.status = to;
        job.updated_at = now();
        mutate(job);
        Ok(true)
    }

    async fn update_progress(&self, id: JobId, progress: u8, step: &str) -> Result<bool, CoreError> {
        let mut state = self.state.lock();
        let job = state.jobs.get_mut(&id).ok_or(CoreError::JobNotFound(id))?;
        if progress < job.progress {
            return Ok(false);
        }
        job.progress = progress;
        job.current_step = step.to_string();
        job.updated_at = now();
        Ok(true)
    }

    async fn insert_artifact(&self, artifact: Artifact) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        if !state.jobs.contains_key(&artifact.job_id) {
            return Err(CoreError::JobNotFound(artifact.job_id));
        }
        let bucket = state.artifacts.entry(artifact.job_id).or_default();
        bucket.retain(|a| !(a.stage == artifact.stage && a.name == artifact.name));
        bucket.push(artifact);
        Ok(())
    }

    async fn list_artifacts(&self, job_id: JobId) -> Vec<Artifact> {
        self.state.lock().artifacts.get(&job_id).cloned().unwrap_or_default()
    }

    async fn get_artifact(&self, job_id: JobId, stage: StageName, name: &str) -> Option<Artifact> {
        self.state
            .lock()
            .artifacts
            .get(&job_id)?
            .iter()
            .find(|a| a.stage == stage && a.name == name)
            .cloned()
    }

    async fn delete_artifacts(&self, job_id: JobId) -> Result<Vec<Artifact>, CoreError> {
        Ok(self.state.lock().artifacts.remove(&job_id).unwrap_or_default())
    }

    async fn delete_artifact(&self, job_id: JobId, stage: StageName, name: &str) {
        if let Some(bucket) = self.state.lock().artifacts.get_mut(&job_id) {
            bucket.retain(|a| !(a.stage == stage && a.name == name));
        }
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcut_core::Style;

    fn new_job() -> Job {
        Job::new(JobId::new(), Style::EnergeticDance, Utc::now())
    }

    #[tokio::test]
    async fn transition_guard_rejects_invalid_edges() {
        let store = InMemoryMetadataStore::new();
        let job = new_job();
        let id = job.id;
        store.create_job(job).await.unwrap();

        let applied = store
            .try_transition(id, JobStatus::Uploading, Box::new(|_| {}))
            .await
            .unwrap();
        assert!(!applied, "Pending -> Uploading is not an edge in spec's table");
    }

    #[tokio::test]
    async fn terminal_status_is_absorbing() {
        let store = InMemoryMetadataStore::new();
        let job = new_job();
        let id = job.id;
        store.create_job(job).await.unwrap();

        assert!(store.try_transition(id, JobStatus::Processing, Box::new(|_| {})).await.unwrap());
        assert!(store.try_transition(id, JobStatus::Failed, Box::new(|_| {})).await.unwrap());
        assert!(!store.try_transition(id, JobStatus::Processing, Box::new(|_| {})).await.unwrap());
    }

    #[tokio::test]
    async fn progress_updates_are_monotonic() {
        let store = InMemoryMetadataStore::new();
        let job = new_job();
        let id = job.id;
        store.create_job(job).await.unwrap();

        assert!(store.update_progress(id, 40, "beats").await.unwrap());
        assert!(!store.update_progress(id, 10, "beats").await.unwrap());
        assert_eq!(store.get_job(id).await.unwrap().progress, 40);
    }
}
