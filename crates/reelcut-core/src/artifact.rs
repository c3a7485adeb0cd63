use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ArtifactId, JobId};
use crate::stage::StageName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    Video,
    Audio,
    Image,
    Json,
}

/// A file produced or consumed by a stage. Immutable once written;
/// `(job_id, stage, name)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub job_id: JobId,
    pub stage: StageName,
    pub name: String,
    pub blob_key: String,
    pub size: u64,
    pub content_kind: ContentKind,
    pub created_at: DateTime<Utc>,
}

/// A reference to an already-stored input artifact, as supplied by the
/// (out-of-scope) HTTP upload surface to `JobService::Create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub blob_key: String,
    pub content_kind: ContentKind,
    pub size: u64,
}
