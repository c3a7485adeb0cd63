use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::ids::{ArtifactId, JobId};
use crate::style::Style;

/// Status of a `Job`. See `state_machine::transition` for the allowed
/// transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The durable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub style: Style,
    /// 0..=100, monotonic non-decreasing per job.
    pub progress: u8,
    pub current_step: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<JobError>,
    pub output_artifact_id: Option<ArtifactId>,
    pub attempt_count: u32,
    pub last_pickup_at: Option<DateTime<Utc>>,
    pub retention_deadline: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, style: Style, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            style,
            progress: 0,
            current_step: "queued".to_string(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            output_artifact_id: None,
            attempt_count: 0,
            last_pickup_at: None,
            retention_deadline: None,
        }
    }
}

/// A read-only view returned by `JobService::Get`, including the
/// public URL of the output artifact when present. URL resolution is left to
/// the (out-of-scope) HTTP surface; here it is a blob key the caller can turn
/// into a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job: Job,
    pub output_blob_key: Option<String>,
}
