use reelcut_core::{ErrorKind, StageName};

/// Classification returned by the Stage Runner, passed verbatim
/// to the Pipeline Executor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    #[error("transient tool failure: {0}")]
    TransientTool(String),
    #[error("fatal tool failure: {0}")]
    FatalTool(String),
    #[error("stage exceeded its timeout")]
    Timeout,
    #[error("job was cancelled")]
    CancelObserved,
    #[error("beat analysis failed: {0}")]
    AnalysisFailed(String),
    #[error("cut plan infeasible: {0}")]
    PlanInfeasible(String),
    #[error("quality gate failed: {0}")]
    QualityGateFailed(String),
}

impl StageError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            StageError::TransientTool(_) => ErrorKind::TransientTool,
            StageError::FatalTool(_) => ErrorKind::FatalTool,
            StageError::Timeout => ErrorKind::TransientTool,
            StageError::CancelObserved => ErrorKind::Cancelled,
            StageError::AnalysisFailed(_) => ErrorKind::AnalysisFailed,
            StageError::PlanInfeasible(_) => ErrorKind::PlanInfeasible,
            StageError::QualityGateFailed(_) => ErrorKind::QualityGateFailed,
        }
    }

    pub fn message(&self) -> String {
        match self {
            StageError::TransientTool(m) | StageError::FatalTool(m) => m.clone(),
            StageError::Timeout => "stage exceeded its timeout".to_string(),
            StageError::CancelObserved => "job was cancelled".to_string(),
            StageError::AnalysisFailed(m) => m.clone(),
            StageError::PlanInfeasible(m) => m.clone(),
            StageError::QualityGateFailed(m) => m.clone(),
        }
    }
}

/// A stage failure or cancellation tagged with the stage it happened in
///.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Completed,
    StageFailed { stage: StageName, error: StageError },
    StageCancelled { stage: StageName },
}
