//! Rule-based mood classification
//!
//! Maps extracted features onto the fixed mood vocabulary. Rules are a
//! prioritised list of fuzzy range conditions; the first rule scoring above
//! the confidence threshold wins, and the confidence reported is the margin
//! to the runner-up. Inputs outside [0, 1] are clamped; an input that
//! matches nothing is neutral with confidence 0.

use crate::models::{Mood, MoodScores};

/// Minimum rule score for a non-neutral classification
const CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Width of the fuzzy falloff band outside a range condition
const FUZZY_BAND: f64 = 0.2;

/// Classifier inputs; bpm stays absolute, everything else is [0, 1]
#[derive(Debug, Clone, Copy)]
pub struct MoodInputs {
    pub energy: f64,
    pub valence: f64,
    pub bpm: f64,
    pub acousticness: f64,
    /// Minor keys read darker than their relative majors
    pub minor_mode: bool,
}

/// Classification output
#[derive(Debug, Clone)]
pub struct MoodVerdict {
    pub mood: Mood,
    /// Margin between the winning rule and the runner-up, in [0, 1]
    pub confidence: f64,
    /// Per-tag scores normalised to sum 1.0
    pub scores: MoodScores,
}

/// An inclusive range with fuzzy falloff of [`FUZZY_BAND`] beyond each edge
#[derive(Debug, Clone, Copy)]
struct Band {
    min: f64,
    max: f64,
    /// Scale of the falloff band; 1.0 for unit features, wider for bpm
    scale: f64,
}

impl Band {
    const fn unit(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            scale: 1.0,
        }
    }

    const fn bpm(min: f64, max: f64) -> Self {
        // bpm is absolute, so the falloff band is 0.2 * 50 = 10 bpm
        Self {
            min,
            max,
            scale: 50.0,
        }
    }

    fn score(&self, value: f64) -> f64 {
        let band = FUZZY_BAND * self.scale;
        if value >= self.min && value <= self.max {
            1.0
        } else if value < self.min {
            (1.0 - (self.min - value) / band).max(0.0)
        } else {
            (1.0 - (value - self.max) / band).max(0.0)
        }
    }
}

/// A single mood rule; conditions are AND-combined by taking the minimum
#[derive(Debug, Clone, Copy)]
struct MoodRule {
    mood: Mood,
    energy: Option<Band>,
    valence: Option<Band>,
    bpm: Option<Band>,
    acousticness: Option<Band>,
    /// Some(true) requires minor mode, Some(false) requires major; a
    /// mismatch halves the rule score rather than zeroing it
    minor: Option<bool>,
}

impl MoodRule {
    fn score(&self, inputs: &MoodInputs) -> f64 {
        let mut score = f64::INFINITY;
        if let Some(band) = self.energy {
            score = score.min(band.score(inputs.energy));
        }
        if let Some(band) = self.valence {
            score = score.min(band.score(inputs.valence));
        }
        if let Some(band) = self.bpm {
            score = score.min(band.score(inputs.bpm));
        }
        if let Some(band) = self.acousticness {
            score = score.min(band.score(inputs.acousticness));
        }
        if !score.is_finite() {
            return 0.0;
        }
        if let Some(wants_minor) = self.minor {
            if wants_minor != inputs.minor_mode {
                score *= 0.5;
            }
        }
        score
    }
}

/// Rules in priority order; earlier rules win ties
const RULES: [MoodRule; 8] = [
    MoodRule {
        mood: Mood::Euphoric,
        energy: Some(Band::unit(0.75, 1.0)),
        valence: Some(Band::unit(0.7, 1.0)),
        bpm: None,
        acousticness: None,
        minor: None,
    },
    MoodRule {
        mood: Mood::Aggressive,
        energy: Some(Band::unit(0.7, 1.0)),
        valence: Some(Band::unit(0.0, 0.35)),
        bpm: None,
        acousticness: None,
        minor: Some(true),
    },
    MoodRule {
        mood: Mood::Driving,
        energy: Some(Band::unit(0.55, 0.9)),
        valence: Some(Band::unit(0.3, 0.7)),
        bpm: Some(Band::bpm(118.0, 142.0)),
        acousticness: None,
        minor: None,
    },
    MoodRule {
        mood: Mood::Energetic,
        energy: Some(Band::unit(0.65, 1.0)),
        valence: Some(Band::unit(0.4, 0.8)),
        bpm: None,
        acousticness: None,
        minor: None,
    },
    MoodRule {
        mood: Mood::Dark,
        energy: Some(Band::unit(0.4, 0.8)),
        valence: Some(Band::unit(0.0, 0.4)),
        bpm: None,
        acousticness: None,
        minor: Some(true),
    },
    MoodRule {
        mood: Mood::Happy,
        energy: Some(Band::unit(0.35, 0.75)),
        valence: Some(Band::unit(0.6, 1.0)),
        bpm: None,
        acousticness: None,
        minor: Some(false),
    },
    MoodRule {
        mood: Mood::Melancholic,
        energy: Some(Band::unit(0.0, 0.45)),
        valence: Some(Band::unit(0.0, 0.35)),
        bpm: None,
        acousticness: None,
        minor: Some(true),
    },
    MoodRule {
        mood: Mood::Calm,
        energy: Some(Band::unit(0.0, 0.4)),
        valence: Some(Band::unit(0.35, 0.8)),
        bpm: None,
        acousticness: Some(Band::unit(0.2, 1.0)),
        minor: None,
    },
];

/// Classify features into the fixed mood set
pub fn classify(inputs: &MoodInputs) -> MoodVerdict {
    let inputs = MoodInputs {
        energy: inputs.energy.clamp(0.0, 1.0),
        valence: inputs.valence.clamp(0.0, 1.0),
        bpm: inputs.bpm,
        acousticness: inputs.acousticness.clamp(0.0, 1.0),
        minor_mode: inputs.minor_mode,
    };

    let mut scores = MoodScores::default();
    let mut winner: Option<(Mood, f64)> = None;
    let mut runner_up = 0.0f64;

    // First rule at or above the threshold wins; every other rule competes
    // only for the runner-up slot that sets the confidence margin.
    for rule in &RULES {
        let score = rule.score(&inputs);
        if score > scores.get(rule.mood) {
            scores.set(rule.mood, score);
        }
        if winner.is_none() && score >= CONFIDENCE_THRESHOLD {
            winner = Some((rule.mood, score));
        } else {
            runner_up = runner_up.max(score);
        }
    }

    let (mood, confidence) = match winner {
        Some((mood, best)) => (mood, (best - runner_up).clamp(0.0, 1.0)),
        None => (Mood::Neutral, 0.0),
    };

    // Neutral absorbs whatever conviction the ruleset lacked
    let best_score = Mood::ALL
        .iter()
        .map(|m| scores.get(*m))
        .fold(0.0f64, f64::max);
    scores.neutral = (1.0 - best_score).max(0.0);
    scores.normalize();

    MoodVerdict {
        mood,
        confidence,
        scores,
    }
}

/// Fixed mood-distance table in [0, 1]; 0 is identity, 1 is maximal clash
///
/// Derived from listening adjacency: euphoric/energetic/driving cluster,
/// dark/melancholic/aggressive cluster, neutral sits mid-distance to all.
pub fn mood_distance(a: Mood, b: Mood) -> f64 {
    if a == b {
        return 0.0;
    }
    1.0 - mood_affinity(a, b)
}

fn mood_affinity(a: Mood, b: Mood) -> f64 {
    use Mood::*;
    // Symmetric; order the pair for a single lookup table
    let (x, y) = if mood_index(a) <= mood_index(b) {
        (a, b)
    } else {
        (b, a)
    };
    match (x, y) {
        (Energetic, Happy) => 0.8,
        (Energetic, Calm) => 0.2,
        (Energetic, Melancholic) => 0.1,
        (Energetic, Aggressive) => 0.6,
        (Energetic, Euphoric) => 0.9,
        (Energetic, Dark) => 0.3,
        (Energetic, Driving) => 0.85,
        (Happy, Calm) => 0.6,
        (Happy, Melancholic) => 0.2,
        (Happy, Aggressive) => 0.3,
        (Happy, Euphoric) => 0.9,
        (Happy, Dark) => 0.2,
        (Happy, Driving) => 0.6,
        (Calm, Melancholic) => 0.6,
        (Calm, Aggressive) => 0.1,
        (Calm, Euphoric) => 0.3,
        (Calm, Dark) => 0.4,
        (Calm, Driving) => 0.3,
        (Melancholic, Aggressive) => 0.3,
        (Melancholic, Euphoric) => 0.1,
        (Melancholic, Dark) => 0.8,
        (Melancholic, Driving) => 0.2,
        (Aggressive, Euphoric) => 0.3,
        (Aggressive, Dark) => 0.7,
        (Aggressive, Driving) => 0.6,
        (Euphoric, Dark) => 0.2,
        (Euphoric, Driving) => 0.7,
        (Dark, Driving) => 0.5,
        (Neutral, _) | (_, Neutral) => 0.5,
        _ => 0.5,
    }
}

fn mood_index(mood: Mood) -> usize {
    Mood::ALL.iter().position(|m| *m == mood).unwrap_or(0)
}
