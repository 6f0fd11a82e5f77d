//! Playlist generation presets
//!
//! A preset is a declarative bundle of sequencing rules. Built-in presets
//! cover the common DJ scenarios; custom presets are JSON files under
//! `<data_root>/presets/`.

use serde::{Deserialize, Serialize};

/// Number of points in a target energy curve
pub const CURVE_POINTS: usize = 16;

/// Named energy-arc shapes, rendered to a 16-point curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedCurve {
    Flat,
    Buildup,
    PeakValley,
    Wave,
    Cooldown,
}

impl NamedCurve {
    /// Render the shape over [0, 1] energy
    pub fn render(&self) -> Vec<f64> {
        let n = CURVE_POINTS;
        (0..n)
            .map(|i| {
                let x = i as f64 / (n - 1) as f64;
                match self {
                    NamedCurve::Flat => 0.5,
                    NamedCurve::Buildup => 0.3 + 0.6 * x,
                    NamedCurve::PeakValley => {
                        // rise to a peak at 1/3, dip mid-set, final peak
                        let wave = (x * std::f64::consts::PI * 1.5).sin();
                        0.5 + 0.4 * wave.abs() * if x < 0.85 { 1.0 } else { 1.1 }
                    }
                    NamedCurve::Wave => 0.5 + 0.3 * (x * std::f64::consts::TAU).sin(),
                    NamedCurve::Cooldown => 0.9 - 0.6 * x,
                }
                .clamp(0.0, 1.0)
            })
            .collect()
    }
}

/// Target energy arc: a named shape or an explicit 16-point curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CurveSpec {
    Named(NamedCurve),
    Custom(Vec<f64>),
}

impl CurveSpec {
    /// Resolve to a 16-point curve with values clamped to [0, 1].
    /// Custom curves of the wrong length are an input error.
    pub fn resolve(&self) -> Result<Vec<f64>, String> {
        match self {
            CurveSpec::Named(named) => Ok(named.render()),
            CurveSpec::Custom(points) => {
                if points.len() != CURVE_POINTS {
                    return Err(format!(
                        "target_energy_curve must have {} points, got {}",
                        CURVE_POINTS,
                        points.len()
                    ));
                }
                Ok(points.iter().map(|v| v.clamp(0.0, 1.0)).collect())
            }
        }
    }
}

impl Default for CurveSpec {
    fn default() -> Self {
        CurveSpec::Named(NamedCurve::Flat)
    }
}

/// Transition scorer weights; normalised at use so presets may supply any
/// non-negative vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub harmony: f64,
    pub bpm: f64,
    pub energy: f64,
    pub mood: f64,
    pub freshness: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            harmony: 0.30,
            bpm: 0.20,
            energy: 0.30,
            mood: 0.15,
            freshness: 0.05,
        }
    }
}

impl ScoreWeights {
    pub fn normalized(&self) -> ScoreWeights {
        let sum = self.harmony + self.bpm + self.energy + self.mood + self.freshness;
        if sum <= f64::EPSILON {
            return ScoreWeights::default();
        }
        ScoreWeights {
            harmony: self.harmony / sum,
            bpm: self.bpm / sum,
            energy: self.energy / sum,
            mood: self.mood / sum,
            freshness: self.freshness / sum,
        }
    }
}

fn default_bpm_range() -> (f64, f64) {
    (crate::models::track::BPM_MIN, crate::models::track::BPM_MAX)
}

fn default_energy_range() -> (f64, f64) {
    (0.0, 1.0)
}

fn default_max_bpm_jump() -> f64 {
    8.0
}

fn default_artist_window() -> usize {
    3
}

fn default_beam_width() -> usize {
    8
}

/// Declarative generation rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_bpm_range")]
    pub bpm_range: (f64, f64),
    #[serde(default = "default_energy_range")]
    pub energy_range: (f64, f64),
    #[serde(default)]
    pub target_energy_curve: CurveSpec,
    /// 0.0 ignores harmony entirely, 1.0 forbids non-neighbor transitions
    #[serde(default)]
    pub harmony_strictness: f64,
    /// 0.0 ignores mood, 1.0 applies the full mood-distance penalty
    #[serde(default)]
    pub mood_consistency: f64,
    #[serde(default = "default_max_bpm_jump")]
    pub max_bpm_jump: f64,
    /// Reject a candidate whose artist appeared within this many positions
    #[serde(default = "default_artist_window")]
    pub avoid_same_artist_window: usize,
    #[serde(default)]
    pub min_track_duration: Option<f64>,
    #[serde(default)]
    pub max_track_duration: Option<f64>,
    #[serde(default = "default_beam_width")]
    pub beam_width: usize,
    #[serde(default)]
    pub weights: ScoreWeights,
}

impl Preset {
    /// Structural validation applied to built-ins and user uploads alike
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("preset name must not be empty".to_string());
        }
        if self.bpm_range.0 > self.bpm_range.1 {
            return Err("bpm_range minimum exceeds maximum".to_string());
        }
        if self.energy_range.0 > self.energy_range.1 {
            return Err("energy_range minimum exceeds maximum".to_string());
        }
        if !(0.0..=1.0).contains(&self.harmony_strictness) {
            return Err("harmony_strictness must be in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.mood_consistency) {
            return Err("mood_consistency must be in [0, 1]".to_string());
        }
        if self.max_bpm_jump <= 0.0 {
            return Err("max_bpm_jump must be positive".to_string());
        }
        if self.beam_width == 0 {
            return Err("beam_width must be at least 1".to_string());
        }
        self.target_energy_curve.resolve()?;
        Ok(())
    }
}

/// The built-in presets, modeled on the classic DJ set shapes
pub fn builtin_presets() -> Vec<Preset> {
    vec![
        Preset {
            name: "Harmonic Flow".to_string(),
            description: "Strict Camelot-neighbor transitions for seamless long mixes".to_string(),
            bpm_range: (90.0, 140.0),
            energy_range: (0.0, 1.0),
            target_energy_curve: CurveSpec::Named(NamedCurve::Flat),
            harmony_strictness: 0.9,
            mood_consistency: 0.4,
            max_bpm_jump: 5.0,
            avoid_same_artist_window: 3,
            min_track_duration: None,
            max_track_duration: None,
            beam_width: 8,
            weights: ScoreWeights {
                harmony: 0.45,
                bpm: 0.20,
                energy: 0.15,
                mood: 0.15,
                freshness: 0.05,
            },
        },
        Preset {
            name: "Energy Build".to_string(),
            description: "Party set that climbs steadily toward a peak".to_string(),
            bpm_range: (110.0, 150.0),
            energy_range: (0.2, 1.0),
            target_energy_curve: CurveSpec::Named(NamedCurve::Buildup),
            harmony_strictness: 0.5,
            mood_consistency: 0.3,
            max_bpm_jump: 8.0,
            avoid_same_artist_window: 3,
            min_track_duration: None,
            max_track_duration: None,
            beam_width: 8,
            weights: ScoreWeights::default(),
        },
        Preset {
            name: "Chill Session".to_string(),
            description: "Low-energy, mood-coherent background listening".to_string(),
            bpm_range: (60.0, 115.0),
            energy_range: (0.0, 0.5),
            target_energy_curve: CurveSpec::Named(NamedCurve::Flat),
            harmony_strictness: 0.3,
            mood_consistency: 0.8,
            max_bpm_jump: 4.0,
            avoid_same_artist_window: 2,
            min_track_duration: None,
            max_track_duration: None,
            beam_width: 8,
            weights: ScoreWeights {
                harmony: 0.15,
                bpm: 0.20,
                energy: 0.30,
                mood: 0.30,
                freshness: 0.05,
            },
        },
        Preset {
            name: "Peak Time".to_string(),
            description: "High-energy prime-time set with a mid-set breather".to_string(),
            bpm_range: (122.0, 138.0),
            energy_range: (0.55, 1.0),
            target_energy_curve: CurveSpec::Named(NamedCurve::PeakValley),
            harmony_strictness: 0.6,
            mood_consistency: 0.2,
            max_bpm_jump: 6.0,
            avoid_same_artist_window: 4,
            min_track_duration: Some(120.0),
            max_track_duration: None,
            beam_width: 8,
            weights: ScoreWeights::default(),
        },
        Preset {
            name: "Warm-Up Set".to_string(),
            description: "Gentle opener that winds the room down from the door".to_string(),
            bpm_range: (95.0, 126.0),
            energy_range: (0.0, 0.7),
            target_energy_curve: CurveSpec::Named(NamedCurve::Cooldown),
            harmony_strictness: 0.5,
            mood_consistency: 0.5,
            max_bpm_jump: 5.0,
            avoid_same_artist_window: 3,
            min_track_duration: None,
            max_track_duration: None,
            beam_width: 8,
            weights: ScoreWeights::default(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_validate() {
        for preset in builtin_presets() {
            preset.validate().unwrap_or_else(|e| {
                panic!("built-in preset {} invalid: {}", preset.name, e);
            });
        }
    }

    #[test]
    fn test_named_curves_bounded() {
        for curve in [
            NamedCurve::Flat,
            NamedCurve::Buildup,
            NamedCurve::PeakValley,
            NamedCurve::Wave,
            NamedCurve::Cooldown,
        ] {
            let points = curve.render();
            assert_eq!(points.len(), CURVE_POINTS);
            assert!(points.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_buildup_is_monotonic() {
        let points = NamedCurve::Buildup.render();
        assert!(points.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_cooldown_is_decreasing() {
        let points = NamedCurve::Cooldown.render();
        assert!(points.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_custom_curve_wrong_length_rejected() {
        let spec = CurveSpec::Custom(vec![0.5; 4]);
        assert!(spec.resolve().is_err());
    }

    #[test]
    fn test_custom_curve_clamped() {
        let spec = CurveSpec::Custom(vec![1.5; CURVE_POINTS]);
        let resolved = spec.resolve().unwrap();
        assert!(resolved.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_weights_normalize() {
        let w = ScoreWeights {
            harmony: 2.0,
            bpm: 0.0,
            energy: 2.0,
            mood: 0.0,
            freshness: 0.0,
        }
        .normalized();
        assert!((w.harmony - 0.5).abs() < 1e-9);
        assert!((w.energy - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_curve_spec_deserialize_both_forms() {
        let named: CurveSpec = serde_json::from_str("\"buildup\"").unwrap();
        assert_eq!(named, CurveSpec::Named(NamedCurve::Buildup));

        let json = serde_json::to_string(&vec![0.5; CURVE_POINTS]).unwrap();
        let custom: CurveSpec = serde_json::from_str(&json).unwrap();
        assert!(matches!(custom, CurveSpec::Custom(_)));
    }
}
