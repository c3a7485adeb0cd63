#![forbid(unsafe_code)]

//! The reelcut processing engine: the Job Service façade, the Worker
//! consumer loop, the Pipeline Executor's DAG dispatch, the Stage Runner's
//! per-stage tool invocations, the Progress Publisher, the Retention Reaper,
//! and the Scheduler that drives both on a fixed interval.

pub mod error;
pub mod job_service;
pub mod pipeline;
pub mod progress;
pub mod reaper;
pub mod scheduler;
pub mod shutdown;
pub mod stage_runner;
pub mod worker;

pub use error::{PipelineOutcome, StageError};
pub use job_service::{CreateJobInputs, JobService};
pub use pipeline::PipelineExecutor;
pub use progress::ProgressPublisher;
pub use reaper::RetentionReaper;
pub use scheduler::Scheduler;
pub use shutdown::Shutdown;
pub use stage_runner::{DefaultStageBodyRunner, StageBodyRunner, StageContext};
pub use worker::Worker;
