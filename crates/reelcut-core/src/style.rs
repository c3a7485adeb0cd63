use serde::{Deserialize, Serialize};

use crate::segment::{Transition, TransitionKind};

/// Color grade parameters applied deterministically by the `style_grade`
/// stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorGrade {
    pub temperature_kelvin: u32,
    pub saturation_scale: f64,
    pub contrast_scale: f64,
}

/// Closed enumeration of style presets. Adding a style is a data
/// change to this enum's match arms, not a new code path elsewhere in the
/// pipeline — the pipeline graph never branches on style name except at
/// `style_grade` and the Cut Planner's transition defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Style {
    CinematicDrama,
    EnergeticDance,
    LuxeTravel,
    ModernMinimal,
}

impl Style {
    pub const ALL: [Style; 4] = [
        Style::CinematicDrama,
        Style::EnergeticDance,
        Style::LuxeTravel,
        Style::ModernMinimal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Style::CinematicDrama => "cinematic_drama",
            Style::EnergeticDance => "energetic_dance",
            Style::LuxeTravel => "luxe_travel",
            Style::ModernMinimal => "modern_minimal",
        }
    }

    pub fn from_str(s: &str) -> Option<Style> {
        Self::ALL.into_iter().find(|style| style.as_str() == s)
    }

    /// Default transition applied to every inter-segment boundary.
    pub fn default_transition(self) -> Transition {
        match self {
            Style::CinematicDrama => Transition { kind: TransitionKind::Crossfade, duration_ms: 500 },
            Style::EnergeticDance => Transition::hard_cut(),
            Style::LuxeTravel => Transition { kind: TransitionKind::Crossfade, duration_ms: 500 },
            Style::ModernMinimal => Transition { kind: TransitionKind::Crossfade, duration_ms: 200 },
        }
    }

    pub fn color_grade(self) -> ColorGrade {
        match self {
            Style::CinematicDrama => ColorGrade { temperature_kelvin: 5600, saturation_scale: 0.9, contrast_scale: 1.15 },
            Style::EnergeticDance => ColorGrade { temperature_kelvin: 2700, saturation_scale: 1.2, contrast_scale: 1.1 },
            Style::LuxeTravel => ColorGrade { temperature_kelvin: 3200, saturation_scale: 1.1, contrast_scale: 1.05 },
            Style::ModernMinimal => ColorGrade { temperature_kelvin: 4500, saturation_scale: 0.9, contrast_scale: 1.0 },
        }
    }
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for style in Style::ALL {
            assert_eq!(Style::from_str(style.as_str()), Some(style));
        }
    }

    #[test]
    fn unknown_style_rejected() {
        assert_eq!(Style::from_str("sepia_nostalgia"), None);
    }
}
