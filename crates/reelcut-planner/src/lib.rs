#![forbid(unsafe_code)]

//! Cut Planner: `Plan(beat_plan, clip_count, style) -> [Segment]`.
//! Pure function over the shared domain types, no I/O.

use reelcut_core::{BeatPlan, CutCandidate, Segment, Style, Transition, TransitionKind};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlanError {
    #[error("clip_count must be at least 1, got {0}")]
    EmptyClipCount(usize),
    #[error("beat plan window length {0} is not positive")]
    NonPositiveWindow(f64),
}

/// `Plan(beat_plan, clip_count, style) -> [Segment]`. `clip_count`
/// segments are produced, one per input clip in upload order; each snaps its
/// right boundary to the best nearby cut candidate, falling back to the
/// nearest beat, falling back to the ideal time.
pub fn plan(beat_plan: &BeatPlan, clip_count: usize, style: Style) -> Result<Vec<Segment>, PlanError> {
    if clip_count == 0 {
        return Err(PlanError::EmptyClipCount(clip_count));
    }
    if beat_plan.window_length_sec <= 0.0 {
        return Err(PlanError::NonPositiveWindow(beat_plan.window_length_sec));
    }

    let target_len = beat_plan.window_length_sec / clip_count as f64;

    let mut boundaries = Vec::with_capacity(clip_count);
    for k in 1..clip_count {
        let ideal = k as f64 * target_len;
        boundaries.push(snap_boundary(beat_plan, ideal, target_len));
    }
    boundaries.push(beat_plan.window_length_sec);

    let mut segments = Vec::with_capacity(clip_count);
    let mut prev_boundary = 0.0;
    for (index, &boundary) in boundaries.iter().enumerate() {
        let duration = boundary - prev_boundary;
        let is_last = index + 1 == clip_count;
        let next_duration = if is_last { None } else { Some(boundaries[index + 1] - boundary) };

        let transition_out = if is_last {
            Transition::hard_cut()
        } else {
            cap_transition(style.default_transition(), duration, next_duration.unwrap_or(duration))
        };

        segments.push(Segment {
            index: index as u32,
            source_artifact_name: format!("normalized_{index}"),
            source_in_sec: 0.0,
            source_out_sec: duration,
            target_out_sec: boundary,
            transition_out,
        });

        prev_boundary = boundary;
    }

    Ok(segments)
}

/// Snaps `ideal` to the best cut candidate within `±target_len/4`, else the
/// nearest beat within `±target_len/2`, else `ideal` itself. Ties broken by
/// score descending, then earlier time first.
fn snap_boundary(beat_plan: &BeatPlan, ideal: f64, target_len: f64) -> f64 {
    let candidate_radius = target_len / 4.0;
    let beat_radius = target_len / 2.0;

    let best_candidate = beat_plan
        .cut_candidates
        .iter()
        .filter(|c| (c.time_sec - ideal).abs() <= candidate_radius)
        .fold(None::<&CutCandidate>, |best, candidate| match best {
            None => Some(candidate),
            Some(current) => Some(pick_better_candidate(current, candidate)),
        });
    if let Some(candidate) = best_candidate {
        return candidate.time_sec;
    }

    let nearest_beat = beat_plan
        .beats
        .iter()
        .filter(|&&t| (t - ideal).abs() <= beat_radius)
        .fold(None::<f64>, |best, &t| match best {
            None => Some(t),
            Some(current) => {
                let current_dist = (current - ideal).abs();
                let candidate_dist = (t - ideal).abs();
                if candidate_dist < current_dist || (candidate_dist == current_dist && t < current) {
                    Some(t)
                } else {
                    Some(current)
                }
            }
        });

    nearest_beat.unwrap_or(ideal)
}

fn pick_better_candidate<'a>(a: &'a CutCandidate, b: &'a CutCandidate) -> &'a CutCandidate {
    if b.score > a.score {
        b
    } else if b.score == a.score && b.time_sec < a.time_sec {
        b
    } else {
        a
    }
}

/// Enforces the crossfade-duration cap: a crossfade may
/// not exceed `min(left_duration, right_duration) / 2`.
fn cap_transition(transition: Transition, left_duration: f64, right_duration: f64) -> Transition {
    if transition.kind != TransitionKind::Crossfade {
        return transition;
    }
    let cap_ms = (left_duration.min(right_duration) / 2.0 * 1000.0) as u32;
    Transition { kind: transition.kind, duration_ms: transition.duration_ms.min(cap_ms) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beat_plan_with(beats: Vec<f64>, cut_candidates: Vec<CutCandidate>, window: f64) -> BeatPlan {
        BeatPlan { tempo_bpm: 120.0, beats, cut_candidates, window_length_sec: window }
    }

    #[test]
    fn segments_are_contiguous_and_cover_the_window() {
        let beat_plan = beat_plan_with(vec![], vec![], 30.0);
        let segments = plan(&beat_plan, 3, Style::ModernMinimal).unwrap();
        assert_eq!(segments.len(), 3);
        let mut prev_end = 0.0;
        for segment in &segments {
            assert_eq!(segment.source_in_sec, 0.0);
            assert!((segment.target_out_sec - prev_end - segment.source_out_sec).abs() < 1e-9);
            prev_end = segment.target_out_sec;
        }
        assert!((prev_end - 30.0).abs() < 1e-9);
    }

    #[test]
    fn snaps_to_highest_scoring_candidate_in_range() {
        let beat_plan = beat_plan_with(
            vec![9.8, 10.2],
            vec![
                CutCandidate { time_sec: 9.8, score: 0.4 },
                CutCandidate { time_sec: 10.2, score: 0.9 },
            ],
            30.0,
        );
        let segments = plan(&beat_plan, 3, Style::EnergeticDance).unwrap();
        assert_eq!(segments[0].target_out_sec, 10.2);
    }

    #[test]
    fn falls_back_to_nearest_beat_when_no_candidate_in_range() {
        let beat_plan = beat_plan_with(vec![9.7], vec![], 30.0);
        let segments = plan(&beat_plan, 3, Style::EnergeticDance).unwrap();
        assert_eq!(segments[0].target_out_sec, 9.7);
    }

    #[test]
    fn falls_back_to_ideal_time_when_nothing_in_range() {
        let beat_plan = beat_plan_with(vec![], vec![], 30.0);
        let segments = plan(&beat_plan, 3, Style::EnergeticDance).unwrap();
        assert_eq!(segments[0].target_out_sec, 10.0);
    }

    #[test]
    fn last_segment_always_hard_cuts() {
        let beat_plan = beat_plan_with(vec![], vec![], 30.0);
        let segments = plan(&beat_plan, 2, Style::CinematicDrama).unwrap();
        assert_eq!(segments.last().unwrap().transition_out, Transition::hard_cut());
    }

    #[test]
    fn crossfade_is_capped_to_half_the_shorter_neighbor() {
        let beat_plan = beat_plan_with(vec![], vec![], 6.0);
        let segments = plan(&beat_plan, 3, Style::LuxeTravel).unwrap();
        let first = &segments[0];
        assert!(first.transition_out.duration_ms <= 1000);
    }

    #[test]
    fn rejects_zero_clip_count() {
        let beat_plan = beat_plan_with(vec![], vec![], 30.0);
        assert_eq!(plan(&beat_plan, 0, Style::ModernMinimal), Err(PlanError::EmptyClipCount(0)));
    }

    proptest::proptest! {
        #[test]
        fn total_duration_always_equals_window_length(clip_count in 1usize..=5, window in 5.0f64..60.0) {
            let beat_plan = beat_plan_with(vec![], vec![], window);
            let segments = plan(&beat_plan, clip_count, Style::ModernMinimal).unwrap();
            let total: f64 = segments.iter().map(|s| s.source_out_sec).sum();
            proptest::prop_assert!((total - window).abs() < 1e-6);
        }

        #[test]
        fn segment_indices_are_ordered_from_zero(clip_count in 1usize..=5) {
            let beat_plan = beat_plan_with(vec![], vec![], 30.0);
            let segments = plan(&beat_plan, clip_count, Style::ModernMinimal).unwrap();
            for (i, segment) in segments.iter().enumerate() {
                proptest::prop_assert_eq!(segment.index, i as u32);
            }
        }
    }
}
