#![forbid(unsafe_code)]

//! Beat Analyzer: reads a decoded audio slice and returns beat
//! times, an estimated tempo, and salience-scored cut candidates.

mod analysis;
mod decode;

use reelcut_core::{BeatPlan, CutCandidate};

pub use analysis::OnsetCurve;

const BEAT_THRESHOLD: f64 = 0.25;
const FFT_SIZE_SAMPLES: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum BeatError {
    #[error("beat analysis failed: {0}")]
    AnalysisFailed(String),
}

/// Configuration for a single `analyze` call. `min_spacing_sec` defaults to
/// 0.8s.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeConfig {
    pub min_spacing_sec: f64,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self { min_spacing_sec: 0.8 }
    }
}

/// `Analyze(audio_slice) -> BeatPlan`. `audio_bytes` is the whole
/// sliced-audio artifact; `window_length_sec` is the slice's known duration
/// (typically 30s), carried explicitly rather than re-derived from the
/// decode so a short final partial frame can't skew it.
pub fn analyze(
    audio_bytes: Vec<u8>,
    extension_hint: Option<&str>,
    window_length_sec: f64,
    config: AnalyzeConfig,
) -> Result<BeatPlan, BeatError> {
    let decoded = decode::decode_pcm(audio_bytes, extension_hint)?;
    if decoded.samples.len() < FFT_SIZE_SAMPLES {
        return Err(BeatError::AnalysisFailed(format!(
            "audio slice decoded to {} samples, fewer than one analysis window of {FFT_SIZE_SAMPLES}",
            decoded.samples.len()
        )));
    }

    let curve = analysis::onset_curve(&decoded.samples, decoded.sample_rate);
    let tempo_bpm = analysis::estimate_tempo_bpm(&curve);
    let beat_period_sec = 60.0 / tempo_bpm;

    let mut raw_beats = analysis::pick_beats(&curve, BEAT_THRESHOLD);
    raw_beats.retain(|(t, _)| *t >= 0.0 && *t <= window_length_sec);

    let beats: Vec<f64> = raw_beats.iter().map(|(t, _)| *t).collect();

    let mut scored: Vec<CutCandidate> = raw_beats
        .iter()
        .map(|(time_sec, strength)| {
            let score = (*strength * downbeat_bonus(*time_sec, beat_period_sec)).clamp(0.0, 1.0);
            CutCandidate { time_sec: *time_sec, score }
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let cut_candidates = suppress_close_candidates(scored, config.min_spacing_sec);

    Ok(BeatPlan { tempo_bpm, beats, cut_candidates, window_length_sec })
}

/// Bonus in `[1, 1.3]` for candidates near an inferred bar boundary (every
/// 4th beat, phase-locked to the first detected beat).
fn downbeat_bonus(time_sec: f64, beat_period_sec: f64) -> f64 {
    if beat_period_sec <= 0.0 {
        return 1.0;
    }
    let bar_period = beat_period_sec * 4.0;
    let phase = (time_sec % bar_period) / bar_period;
    let distance_to_downbeat = phase.min(1.0 - phase);
    1.0 + 0.3 * (1.0 - distance_to_downbeat * 2.0).max(0.0)
}

/// Greedily keeps the highest-scored candidate in each `min_spacing_sec`
/// neighborhood, suppressing any candidate closer than `min_spacing_sec` to
/// an already-kept, higher-scored one.
fn suppress_close_candidates(sorted_desc: Vec<CutCandidate>, min_spacing_sec: f64) -> Vec<CutCandidate> {
    let mut kept: Vec<CutCandidate> = Vec::new();
    for candidate in sorted_desc {
        let too_close = kept.iter().any(|k| (k.time_sec - candidate.time_sec).abs() < min_spacing_sec);
        if !too_close {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_click_track(sample_rate: u32, duration_sec: f64, bpm: f64) -> Vec<f64> {
        let n = (sample_rate as f64 * duration_sec) as usize;
        let period_samples = (60.0 / bpm * sample_rate as f64) as usize;
        let mut samples = vec![0.0; n];
        let mut i = 0;
        while i < n {
            for k in 0..200.min(n - i) {
                samples[i + k] = (1.0 - k as f64 / 200.0) * (std::f64::consts::PI * k as f64 / 40.0).sin();
            }
            i += period_samples;
        }
        samples
    }

    #[test]
    fn onset_curve_peaks_near_synthetic_clicks() {
        let sample_rate = 44_100;
        let samples = synthetic_click_track(sample_rate, 5.0, 120.0);
        let curve = analysis::onset_curve(&samples, sample_rate);
        assert!(curve.strengths.iter().any(|&s| s > 0.3));
    }

    #[test]
    fn suppression_keeps_highest_scoring_within_window() {
        let candidates = vec![
            CutCandidate { time_sec: 1.0, score: 0.9 },
            CutCandidate { time_sec: 1.2, score: 0.5 },
            CutCandidate { time_sec: 5.0, score: 0.4 },
        ];
        let kept = suppress_close_candidates(candidates, 0.8);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].time_sec, 1.0);
        assert_eq!(kept[1].time_sec, 5.0);
    }

    #[test]
    fn downbeat_bonus_peaks_at_bar_boundaries() {
        let period = 0.5;
        let at_downbeat = downbeat_bonus(0.0, period);
        let mid_bar = downbeat_bonus(period, period);
        assert!(at_downbeat >= mid_bar);
    }
}
