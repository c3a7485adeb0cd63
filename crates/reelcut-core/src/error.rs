use serde::{Deserialize, Serialize};

use crate::stage::StageName;

/// Taxonomy of error kinds surfaced to `Job.error.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ErrorKind {
    #[error("invalid input")]
    InvalidInput,
    #[error("storage unavailable")]
    StorageUnavailable,
    #[error("transient tool failure")]
    TransientTool,
    #[error("fatal tool failure")]
    FatalTool,
    #[error("beat analysis failed")]
    AnalysisFailed,
    #[error("cut plan infeasible")]
    PlanInfeasible,
    #[error("quality gate failed")]
    QualityGateFailed,
    #[error("job cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Whether the worker should retry a job that failed with this kind.
    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::StorageUnavailable | ErrorKind::TransientTool)
    }
}

/// Structured error persisted on a terminal `Job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub stage: Option<StageName>,
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    pub fn new(kind: ErrorKind, stage: Option<StageName>, message: impl Into<String>) -> Self {
        let mut message = message.into();
        truncate_utf8_lossy_in_place(&mut message, 2048);
        Self {
            kind,
            stage,
            retryable: kind.retryable(),
            message,
        }
    }
}

/// Truncates `s` to at most `max_bytes` bytes, never splitting a UTF-8
/// character boundary. Used to bound stderr tails and planner/analyzer
/// reasons folded into `JobError.message`.
pub fn truncate_utf8_lossy_in_place(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

/// Validation failures raised by `JobService::Create`, mapped 1:1 to
/// `ErrorKind::InvalidInput` by the caller but kept distinct here so the
/// (out-of-scope) HTTP surface can translate each variant to a status code.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("clip count {0} outside allowed range 1..={1}")]
    ClipCountOutOfRange(usize, usize),
    #[error("artifact {0} has content kind {1:?}, expected video or image")]
    WrongClipContentKind(String, crate::artifact::ContentKind),
    #[error("audio artifact {0} has content kind {1:?}, expected audio")]
    WrongAudioContentKind(String, crate::artifact::ContentKind),
    #[error("audio window length {0}s must equal 30s")]
    WindowLengthNotThirtySeconds(f64),
    #[error("audio window [{start}, {end}] lies outside audio duration {duration}s")]
    WindowOutsideAudioDuration { start: f64, end: f64, duration: f64 },
    #[error("unknown style {0:?}")]
    UnknownStyle(String),
}

/// Top-level error for store-backed operations (Job Service, Artifact Store
/// Adapter, reaper). Distinct from `ErrorKind` because it is a Rust `Error`
/// used with `?`, not a persisted enum.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("job {0} not found")]
    JobNotFound(crate::ids::JobId),
    #[error("transition rejected: {0} -> {1} is not allowed")]
    TransitionRejected(crate::job::JobStatus, crate::job::JobStatus),
}
