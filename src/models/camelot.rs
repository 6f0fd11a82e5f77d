//! Camelot wheel notation and harmonic compatibility helpers
//!
//! The Camelot wheel arranges the 24 musical keys on a 12-position circle
//! with an inner (A, minor) and outer (B, major) ring. Adjacent positions,
//! the A/B partner at the same position, and the dominant (+7) are
//! harmonically compatible for mixing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inner (minor) or outer (major) ring of the wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Wheel {
    /// Minor keys (inner ring)
    A,
    /// Major keys (outer ring)
    B,
}

/// A position on the Camelot wheel, e.g. `8A`
///
/// Positions are 1..=12; construction through [`Camelot::new`] or `FromStr`
/// guarantees the invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Camelot {
    position: u8,
    wheel: Wheel,
}

/// Canonical key names, indexed by (position - 1)
const MINOR_KEYS: [&str; 12] = [
    "Am", "Em", "Bm", "F#m", "C#m", "G#m", "D#m", "Bbm", "Fm", "Cm", "Gm", "Dm",
];
const MAJOR_KEYS: [&str; 12] = [
    "C", "G", "D", "A", "E", "B", "F#", "Db", "Ab", "Eb", "Bb", "F",
];

/// Enharmonic spellings accepted on input, mapped to the canonical name
const KEY_ALIASES: [(&str, &str); 10] = [
    ("Ebm", "D#m"),
    ("Abm", "G#m"),
    ("Dbm", "C#m"),
    ("A#m", "Bbm"),
    ("Gb", "F#"),
    ("C#", "Db"),
    ("G#", "Ab"),
    ("D#", "Eb"),
    ("A#", "Bb"),
    ("Cb", "B"),
];

impl Camelot {
    /// Build a wheel position; `position` must be in 1..=12
    pub fn new(position: u8, wheel: Wheel) -> Option<Self> {
        if (1..=12).contains(&position) {
            Some(Self { position, wheel })
        } else {
            None
        }
    }

    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn wheel(&self) -> Wheel {
        self.wheel
    }

    /// True for minor keys (the A ring)
    pub fn is_minor(&self) -> bool {
        self.wheel == Wheel::A
    }

    /// Canonical key name for this position, e.g. `8A` → `"Bbm"`
    pub fn key_name(&self) -> &'static str {
        let idx = (self.position - 1) as usize;
        match self.wheel {
            Wheel::A => MINOR_KEYS[idx],
            Wheel::B => MAJOR_KEYS[idx],
        }
    }

    /// Parse a key name (canonical or enharmonic alias) into its position
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        let canonical = KEY_ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(key))
            .map(|(_, c)| *c)
            .unwrap_or(key);

        for (idx, name) in MINOR_KEYS.iter().enumerate() {
            if name.eq_ignore_ascii_case(canonical) {
                return Camelot::new(idx as u8 + 1, Wheel::A);
            }
        }
        for (idx, name) in MAJOR_KEYS.iter().enumerate() {
            if name.eq_ignore_ascii_case(canonical) {
                return Camelot::new(idx as u8 + 1, Wheel::B);
            }
        }
        None
    }

    /// Move clockwise by `steps` positions, wrapping 12 → 1
    pub fn step(&self, steps: i8) -> Self {
        let pos = (self.position as i16 - 1 + steps as i16).rem_euclid(12) as u8 + 1;
        Self {
            position: pos,
            wheel: self.wheel,
        }
    }

    /// The relative major/minor partner at the same position
    pub fn relative(&self) -> Self {
        Self {
            position: self.position,
            wheel: match self.wheel {
                Wheel::A => Wheel::B,
                Wheel::B => Wheel::A,
            },
        }
    }

    /// Shortest distance around the circle, ignoring the ring
    pub fn circle_distance(&self, other: &Camelot) -> u8 {
        let diff = (self.position as i16 - other.position as i16).abs() as u8;
        diff.min(12 - diff)
    }

    /// Mixing neighbors: self, ±1 on the same ring, the relative partner,
    /// and the dominant (+7)
    pub fn neighbors(&self) -> Vec<Camelot> {
        vec![
            *self,
            self.step(1),
            self.step(-1),
            self.relative(),
            self.step(7),
        ]
    }

    /// Angle of this position on the wheel in radians, for embedding the
    /// circular key space into a flat feature vector
    pub fn angle(&self) -> f64 {
        (self.position as f64 - 1.0) / 12.0 * std::f64::consts::TAU
    }

    /// All 24 positions, A ring first, ascending
    pub fn all() -> impl Iterator<Item = Camelot> {
        (1..=12u8)
            .map(|p| Camelot {
                position: p,
                wheel: Wheel::A,
            })
            .chain((1..=12u8).map(|p| Camelot {
                position: p,
                wheel: Wheel::B,
            }))
    }
}

/// Harmonic compatibility of a transition, before strictness scaling
///
/// 1.0 for the same key, the relative partner, or ±1 on the same ring;
/// 0.6 for a ±2 step or the dominant (+7); 0.0 otherwise.
pub fn harmonic_affinity(from: &Camelot, to: &Camelot) -> f64 {
    if from == to || *to == from.relative() {
        return 1.0;
    }
    if from.wheel() == to.wheel() {
        match from.circle_distance(to) {
            1 => 1.0,
            2 => 0.6,
            // +7 clockwise is 5 the short way round, so the dominant and
            // subdominant both land here
            5 => 0.6,
            _ => 0.0,
        }
    } else {
        0.0
    }
}

impl fmt::Display for Camelot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = match self.wheel {
            Wheel::A => 'A',
            Wheel::B => 'B',
        };
        write!(f, "{}{}", self.position, ring)
    }
}

/// Parse failure for Camelot notation or key names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid camelot notation: {0}")]
pub struct ParseCamelotError(pub String);

impl FromStr for Camelot {
    type Err = ParseCamelotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < 2 {
            return Err(ParseCamelotError(s.to_string()));
        }
        let (num, ring) = s.split_at(s.len() - 1);
        let wheel = match ring {
            "A" | "a" => Wheel::A,
            "B" | "b" => Wheel::B,
            _ => return Err(ParseCamelotError(s.to_string())),
        };
        let position: u8 = num.parse().map_err(|_| ParseCamelotError(s.to_string()))?;
        Camelot::new(position, wheel).ok_or_else(|| ParseCamelotError(s.to_string()))
    }
}

impl Serialize for Camelot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Camelot {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
