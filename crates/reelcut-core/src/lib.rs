#![forbid(unsafe_code)]

//! Shared domain types for the reelcut job orchestration core: the `Job`,
//! `Artifact`, `Segment` and `BeatPlan` records, the style preset table, the
//! error taxonomy, the state-machine transition table, and runtime config.

pub mod artifact;
pub mod beat_plan;
pub mod config;
pub mod error;
pub mod ids;
pub mod job;
pub mod segment;
pub mod stage;
pub mod state_machine;
pub mod style;

pub use artifact::{Artifact, ArtifactRef, ContentKind};
pub use beat_plan::{BeatPlan, CutCandidate};
pub use config::ReelcutConfig;
pub use error::{CoreError, ErrorKind, JobError, ValidationError};
pub use ids::{ArtifactId, JobId};
pub use job::{Job, JobStatus, JobView};
pub use segment::{Segment, Transition, TransitionKind};
pub use stage::StageName;
pub use style::{ColorGrade, Style};
