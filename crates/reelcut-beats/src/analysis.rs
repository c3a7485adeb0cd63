//! Onset-strength curve, local-maxima beat picking, tempo estimation, and
//! salience scoring. The windowed-FFT machinery follows the
//! `SpectralAnalyzer` in the `Bojan20-reelforge-standalone` pack repo
//! (Hann-windowed frames through `realfft`, magnitude spectrum per frame);
//! here the frame-to-frame magnitude difference (spectral flux) stands in
//! for that repo's diff-regression use of the same spectra.

use num_complex::Complex64;
use realfft::{RealFftPlanner, RealToComplex};

const FFT_SIZE: usize = 2048;
const HOP_SIZE: usize = 512;

pub struct OnsetCurve {
    /// Onset strength per hop, normalized to `[0, 1]`.
    pub strengths: Vec<f64>,
    pub hop_size: usize,
    pub sample_rate: u32,
}

impl OnsetCurve {
    pub fn time_of(&self, frame_index: usize) -> f64 {
        (frame_index * self.hop_size) as f64 / self.sample_rate as f64
    }
}

/// Computes a spectral-flux onset-strength curve over `samples`.
pub fn onset_curve(samples: &[f64], sample_rate: u32) -> OnsetCurve {
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);
    let window: Vec<f64> = (0..FFT_SIZE)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / FFT_SIZE as f64).cos()))
        .collect();

    let num_frames = samples.len().saturating_sub(FFT_SIZE) / HOP_SIZE + 1;
    let num_bins = FFT_SIZE / 2 + 1;

    let mut input = vec![0.0f64; FFT_SIZE];
    let mut spectrum = vec![Complex64::new(0.0, 0.0); num_bins];
    let mut prev_magnitude = vec![0.0f64; num_bins];
    let mut strengths = Vec::with_capacity(num_frames);

    for frame_idx in 0..num_frames {
        let start = frame_idx * HOP_SIZE;
        for i in 0..FFT_SIZE {
            let idx = start + i;
            input[i] = if idx < samples.len() { samples[idx] * window[i] } else { 0.0 };
        }

        fft_forward(&fft, &mut input, &mut spectrum);

        let mut flux = 0.0;
        for (bin, prev) in spectrum.iter().zip(prev_magnitude.iter_mut()) {
            let magnitude = bin.norm();
            let diff = magnitude - *prev;
            if diff > 0.0 {
                flux += diff;
            }
            *prev = magnitude;
        }
        strengths.push(flux);
    }

    normalize_in_place(&mut strengths);
    OnsetCurve { strengths, hop_size: HOP_SIZE, sample_rate }
}

fn fft_forward(fft: &std::sync::Arc<dyn RealToComplex<f64>>, input: &mut [f64], spectrum: &mut [Complex64]) {
    let _ = fft.process(input, spectrum);
}

fn normalize_in_place(values: &mut [f64]) {
    let max = values.iter().cloned().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return;
    }
    for v in values.iter_mut() {
        *v /= max;
    }
}

/// Picks local maxima above `threshold` as beats: `(time_sec, strength)`.
pub fn pick_beats(curve: &OnsetCurve, threshold: f64) -> Vec<(f64, f64)> {
    let mut beats = Vec::new();
    let s = &curve.strengths;
    for i in 1..s.len().saturating_sub(1) {
        if s[i] >= threshold && s[i] >= s[i - 1] && s[i] >= s[i + 1] {
            beats.push((curve.time_of(i), s[i]));
        }
    }
    beats
}

/// Estimates tempo (BPM) from the onset curve's autocorrelation, searching
/// lags corresponding to 60-200 BPM.
pub fn estimate_tempo_bpm(curve: &OnsetCurve) -> f64 {
    let frame_rate = curve.sample_rate as f64 / curve.hop_size as f64;
    let min_lag = (frame_rate * 60.0 / 200.0).round() as usize;
    let max_lag = (frame_rate * 60.0 / 60.0).round() as usize;

    let s = &curve.strengths;
    if s.len() < max_lag + 1 || max_lag <= min_lag {
        return 120.0;
    }

    let mut best_lag = min_lag;
    let mut best_score = f64::MIN;
    for lag in min_lag..=max_lag {
        let mut score = 0.0;
        for i in 0..s.len() - lag {
            score += s[i] * s[i + lag];
        }
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    if best_lag == 0 {
        return 120.0;
    }
    60.0 * frame_rate / best_lag as f64
}
