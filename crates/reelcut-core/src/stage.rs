use serde::{Deserialize, Serialize};

/// Name of a node in the fixed pipeline DAG, or `Input` for
/// user-uploaded artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageName {
    Input,
    AudioSlice,
    Beats,
    Plan,
    Normalize,
    CutAndConcat,
    StyleGrade,
    Mux,
    QualityGate,
}

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Input => "input",
            StageName::AudioSlice => "audio_slice",
            StageName::Beats => "beats",
            StageName::Plan => "plan",
            StageName::Normalize => "normalize",
            StageName::CutAndConcat => "cut_and_concat",
            StageName::StyleGrade => "style_grade",
            StageName::Mux => "mux",
            StageName::QualityGate => "quality_gate",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
