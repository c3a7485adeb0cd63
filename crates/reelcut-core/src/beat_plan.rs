use serde::{Deserialize, Serialize};

/// A beat with a salience score, eligible to become a segment boundary
/// (spec GLOSSARY "Cut candidate").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CutCandidate {
    pub time_sec: f64,
    /// In `[0, 1]`.
    pub score: f64,
}

/// The Beat Analyzer's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatPlan {
    pub tempo_bpm: f64,
    /// Strictly increasing, seconds within the audio window.
    pub beats: Vec<f64>,
    /// Subset of `beats`, sorted by descending score.
    pub cut_candidates: Vec<CutCandidate>,
    pub window_length_sec: f64,
}
