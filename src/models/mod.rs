//! Core data model shared across services, store and API

pub mod camelot;
pub mod playlist;
pub mod preset;
pub mod task;
pub mod track;

pub use camelot::{harmonic_affinity, Camelot, Wheel};
pub use playlist::{Playlist, PlaylistEntry, PlaylistMetadata};
pub use preset::{builtin_presets, CurveSpec, NamedCurve, Preset, ScoreWeights};
pub use task::{AnalysisSummary, Task, TaskError, TaskKind, TaskResult, TaskState};
pub use track::{
    Confidence, EnergyPoint, Features, FileInfo, Mood, MoodScores, StoreStats, Track, TrackTags,
    ANALYSIS_VERSION,
};
