use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    HardCut,
    Crossfade,
    FadeBlack,
}

/// A boundary transition descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub duration_ms: u32,
}

impl Transition {
    pub const fn hard_cut() -> Self {
        Self { kind: TransitionKind::HardCut, duration_ms: 0 }
    }
}

/// The Cut Planner's output: one output-timeline interval sourced from one
/// input clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub index: u32,
    pub source_artifact_name: String,
    pub source_in_sec: f64,
    pub source_out_sec: f64,
    pub target_out_sec: f64,
    pub transition_out: Transition,
}
