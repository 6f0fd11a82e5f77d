//! Constraint-directed playlist sequencing
//!
//! Bounded beam search over the analysed library. Each step extends every
//! partial playlist by every feasible candidate and keeps the top-W partials
//! by cumulative transition score. Hard constraints (BPM jump ceiling,
//! freshness, full harmonic strictness) prune extensions; soft preferences
//! are the weighted scorer.

use crate::error::AppError;
use crate::models::camelot::{harmonic_affinity, Camelot};
use crate::models::playlist::{resample_curve, Playlist, PlaylistEntry, PlaylistMetadata};
use crate::models::task::TaskResult;
use crate::models::{Mood, Preset, Track};
use crate::services::mood_classifier::mood_distance;
use crate::services::task_manager::{TaskHandle, TaskOutcome};
use crate::store::filter::TrackFilter;
use crate::store::Store;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Fully resolved generation parameters
#[derive(Debug, Clone)]
pub struct GenerationSpec {
    pub preset: Preset,
    pub target_duration_seconds: f64,
    /// Constrains the first position when present
    pub seed_path: Option<PathBuf>,
    /// Restrict the candidate pool to these paths when present
    pub pool_paths: Option<Vec<PathBuf>>,
    /// 0.0 is fully deterministic; 1.0 is pure noise
    pub surprise: f64,
    /// Derived from the task id so reruns with a fixed id reproduce
    pub rng_seed: u64,
}

/// A candidate track flattened for scoring
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    title: Option<String>,
    artist: Option<String>,
    bpm: f64,
    camelot: Camelot,
    energy: f64,
    mood: Mood,
    duration: f64,
}

impl Candidate {
    fn from_track(track: &Track) -> Option<Self> {
        let features = track.features.as_ref()?;
        Some(Self {
            path: track.path.clone(),
            title: track.tags.title.clone(),
            artist: track.tags.artist.clone(),
            bpm: features.bpm,
            camelot: features.camelot,
            energy: features.energy,
            mood: features.mood,
            duration: track.file.duration_seconds,
        })
    }
}

/// One partial playlist on the beam
#[derive(Debug, Clone)]
struct Partial {
    order: Vec<usize>,
    used: Vec<bool>,
    cumulative: f64,
    duration: f64,
    /// transition scores parallel to `order`
    transitions: Vec<f64>,
    /// tie-break keys of the last extension
    last_bpm_delta: f64,
    last_harmony: f64,
}

impl Partial {
    fn last(&self) -> usize {
        *self.order.last().expect("partial is never empty")
    }
}

/// Playlist generation service
pub struct PlaylistEngine {
    store: Arc<Store>,
    generation_timeout: Duration,
}

impl PlaylistEngine {
    pub fn new(store: Arc<Store>, generation_timeout: Duration) -> Self {
        Self {
            store,
            generation_timeout,
        }
    }

    /// Task body: load candidates, run the beam, assemble the playlist
    pub async fn generate(
        &self,
        spec: GenerationSpec,
        handle: TaskHandle,
    ) -> Result<TaskOutcome, AppError> {
        if handle.is_cancelled() {
            return Ok(TaskOutcome::Cancelled);
        }
        handle.start()?;
        let deadline = std::time::Instant::now() + self.generation_timeout;

        tracing::info!(
            task_id = %handle.id(),
            preset = %spec.preset.name,
            target_seconds = spec.target_duration_seconds,
            "playlist generation started"
        );

        // loading phase
        let candidates = self.load_candidates(&spec)?;
        handle.set_progress(10.0);
        if handle.is_cancelled() {
            return Ok(TaskOutcome::Cancelled);
        }

        // a seed that fell out of the pool (filters, deletion) is an input error
        let seed_index = match &spec.seed_path {
            Some(seed) => {
                let found = candidates.iter().position(|c| &c.path == seed);
                if found.is_none() {
                    return Err(AppError::invalid_argument(format!(
                        "seed track not in candidate pool: {}",
                        seed.display()
                    )));
                }
                found
            }
            None => None,
        };

        // generating phase; the beam is CPU-bound, so it runs on the
        // blocking pool with owned copies of its inputs
        let control = BeamControl {
            cancel: Some(handle.cancel_token()),
            deadline: Some(deadline),
            progress: Some(handle.clone()),
        };
        let beam_spec = spec.clone();
        let beam_candidates = candidates.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            run_beam(&beam_candidates, &beam_spec, seed_index, control)
        })
        .await
        .map_err(|err| AppError::internal(format!("beam search task failed: {err}")))??;

        let outcome = match outcome {
            BeamOutcome::Cancelled => return Ok(TaskOutcome::Cancelled),
            BeamOutcome::Finished(result) => result,
        };

        let playlist = assemble_playlist(&candidates, &outcome, &spec);
        tracing::info!(
            task_id = %handle.id(),
            tracks = playlist.tracks.len(),
            duration_seconds = playlist.metadata.total_duration_seconds,
            truncated = playlist.metadata.truncated,
            empty = playlist.metadata.empty,
            "playlist generation finished"
        );
        Ok(TaskOutcome::Completed(TaskResult::Playlist(playlist)))
    }

    fn load_candidates(&self, spec: &GenerationSpec) -> Result<Vec<Candidate>, AppError> {
        let tracks: Vec<Track> = match &spec.pool_paths {
            Some(paths) => {
                // tracks removed from the store since the request drop silently
                paths
                    .iter()
                    .filter_map(|p| self.store.get_by_path(p).ok())
                    .collect()
            }
            None => self.store.tracks_matching(&TrackFilter::default()),
        };

        let preset = &spec.preset;
        let candidates: Vec<Candidate> = tracks
            .iter()
            .filter_map(Candidate::from_track)
            .filter(|c| c.bpm >= preset.bpm_range.0 && c.bpm <= preset.bpm_range.1)
            .filter(|c| c.energy >= preset.energy_range.0 && c.energy <= preset.energy_range.1)
            .filter(|c| preset.min_track_duration.map_or(true, |min| c.duration >= min))
            .filter(|c| preset.max_track_duration.map_or(true, |max| c.duration <= max))
            .collect();

        tracing::debug!(
            pool = tracks.len(),
            candidates = candidates.len(),
            "candidate filtering done"
        );
        Ok(candidates)
    }
}

/// External controls threaded through the beam loop
struct BeamControl {
    cancel: Option<tokio_util::sync::CancellationToken>,
    deadline: Option<std::time::Instant>,
    progress: Option<TaskHandle>,
}

impl BeamControl {
    fn none() -> Self {
        Self {
            cancel: None,
            deadline: None,
            progress: None,
        }
    }
}

enum BeamOutcome {
    Finished(SequenceResult),
    Cancelled,
}

/// Result of the search before playlist assembly
struct SequenceResult {
    order: Vec<usize>,
    transitions: Vec<f64>,
    duration: f64,
    truncated: bool,
}

/// The bounded beam search
///
/// Cancellation is observed between steps, so abort latency is one beam
/// extension. The timeout fails the whole task per the error taxonomy.
fn run_beam(
    candidates: &[Candidate],
    spec: &GenerationSpec,
    seed_index: Option<usize>,
    control: BeamControl,
) -> Result<BeamOutcome, AppError> {
    let preset = &spec.preset;
    let weights = preset.weights.normalized();
    let target = spec.target_duration_seconds;

    if candidates.is_empty() {
        return Ok(BeamOutcome::Finished(SequenceResult {
            order: Vec::new(),
            transitions: Vec::new(),
            duration: 0.0,
            truncated: false,
        }));
    }

    let curve = preset
        .target_energy_curve
        .resolve()
        .map_err(AppError::invalid_argument)?;

    // expected sequence length, for mapping positions onto the 16-point curve
    let avg_duration = candidates.iter().map(|c| c.duration).sum::<f64>()
        / candidates.len() as f64;
    let expected_len = if avg_duration > 0.0 {
        ((target / avg_duration).ceil() as usize).max(1)
    } else {
        candidates.len().max(1)
    };

    // first position: the seed, or every candidate scored by energy fit
    let mut beam: Vec<Partial> = {
        let firsts: Vec<usize> = match seed_index {
            Some(idx) => vec![idx],
            None => (0..candidates.len()).collect(),
        };
        let mut initial: Vec<Partial> = firsts
            .into_iter()
            .map(|idx| {
                let c = &candidates[idx];
                let mut used = vec![false; candidates.len()];
                used[idx] = true;
                let fit = energy_fit(c.energy, &curve, 0, expected_len);
                Partial {
                    order: vec![idx],
                    used,
                    cumulative: fit * weights.energy,
                    duration: c.duration,
                    transitions: vec![0.0],
                    last_bpm_delta: 0.0,
                    last_harmony: 1.0,
                }
            })
            .collect();
        sort_beam(&mut initial, candidates);
        initial.truncate(preset.beam_width);
        initial
    };

    let mut finished: Vec<Partial> = Vec::new();
    let mut step = 0usize;

    while !beam.is_empty() {
        if let Some(cancel) = &control.cancel {
            if cancel.is_cancelled() {
                return Ok(BeamOutcome::Cancelled);
            }
        }
        if let Some(deadline) = control.deadline {
            if std::time::Instant::now() >= deadline {
                return Err(AppError::timeout("playlist generation exceeded its budget"));
            }
        }

        step += 1;
        // the surprise stream is keyed by (task seed, step) so fixed seeds
        // reproduce exactly
        let mut rng = StdRng::seed_from_u64(spec.rng_seed.wrapping_add(step as u64));

        let mut extended: Vec<Partial> = Vec::new();
        for partial in beam.drain(..) {
            if partial.duration >= target {
                finished.push(partial);
                continue;
            }
            let from = &candidates[partial.last()];
            let mut any = false;

            for (idx, candidate) in candidates.iter().enumerate() {
                if !feasible(&partial, idx, candidates, preset) {
                    continue;
                }
                any = true;

                let position = partial.order.len();
                let scored = transition_score(
                    from,
                    candidate,
                    position,
                    expected_len,
                    &curve,
                    preset,
                    &weights,
                );
                let noise: f64 = rng.gen_range(0.0..1.0);
                let mixed =
                    (1.0 - spec.surprise) * scored.total + spec.surprise * noise;

                let mut next = partial.clone();
                next.order.push(idx);
                next.used[idx] = true;
                next.cumulative += mixed;
                next.duration += candidate.duration;
                next.transitions.push(mixed);
                next.last_bpm_delta = (from.bpm - candidate.bpm).abs();
                next.last_harmony = scored.harmony;
                extended.push(next);
            }

            if !any {
                finished.push(partial);
            }
        }

        sort_beam(&mut extended, candidates);
        extended.truncate(preset.beam_width);
        beam = extended;

        if let Some(handle) = &control.progress {
            let pct = 10.0 + 85.0 * (step as f64 / expected_len.max(step) as f64);
            handle.set_progress(pct.min(95.0));
        }
    }

    // prefer partials that reached the target; otherwise take the best of
    // what the beam produced
    let reached: Vec<&Partial> = finished.iter().filter(|p| p.duration >= target).collect();
    let best = if !reached.is_empty() {
        reached
            .into_iter()
            .max_by(|a, b| a.cumulative.total_cmp(&b.cumulative))
    } else {
        finished
            .iter()
            .max_by(|a, b| a.cumulative.total_cmp(&b.cumulative))
    };

    Ok(BeamOutcome::Finished(match best {
        Some(partial) => SequenceResult {
            order: partial.order.clone(),
            transitions: partial.transitions.clone(),
            duration: partial.duration,
            truncated: partial.duration < target,
        },
        None => SequenceResult {
            order: Vec::new(),
            transitions: Vec::new(),
            duration: 0.0,
            truncated: false,
        },
    }))
}

/// Hard feasibility: freshness (no repeats, artist window), the BPM jump
/// ceiling, and full-strictness harmony
fn feasible(partial: &Partial, idx: usize, candidates: &[Candidate], preset: &Preset) -> bool {
    if partial.used[idx] {
        return false;
    }
    let candidate = &candidates[idx];
    let from = &candidates[partial.last()];

    if (from.bpm - candidate.bpm).abs() > preset.max_bpm_jump {
        return false;
    }

    if preset.harmony_strictness >= 1.0
        && harmonic_affinity(&from.camelot, &candidate.camelot) <= 0.0
    {
        return false;
    }

    if let Some(artist) = &candidate.artist {
        let window = preset.avoid_same_artist_window;
        if window > 0 {
            let recent = partial.order.iter().rev().take(window);
            for &prev in recent {
                if candidates[prev].artist.as_deref() == Some(artist.as_str()) {
                    return false;
                }
            }
        }
    }

    true
}

struct ScoredTransition {
    total: f64,
    harmony: f64,
}

/// The weighted transition scorer
fn transition_score(
    from: &Candidate,
    to: &Candidate,
    position: usize,
    expected_len: usize,
    curve: &[f64],
    preset: &Preset,
    weights: &crate::models::ScoreWeights,
) -> ScoredTransition {
    let affinity = harmonic_affinity(&from.camelot, &to.camelot);
    // strictness 0 treats every key as compatible; strictness 1 scores raw
    let harmony = 1.0 - preset.harmony_strictness * (1.0 - affinity);

    let bpm = (1.0 - (from.bpm - to.bpm).abs() / preset.max_bpm_jump).max(0.0);
    let energy = energy_fit(to.energy, curve, position, expected_len);
    let mood = if from.mood == to.mood {
        1.0
    } else {
        1.0 - preset.mood_consistency * mood_distance(from.mood, to.mood)
    };
    // freshness violations were filtered out, so the component is constant
    let freshness = 1.0;

    let total = weights.harmony * harmony
        + weights.bpm * bpm
        + weights.energy * energy
        + weights.mood * mood
        + weights.freshness * freshness;

    ScoredTransition {
        total,
        harmony,
    }
}

/// Closeness of a track's energy to the target curve at this position
fn energy_fit(energy: f64, curve: &[f64], position: usize, expected_len: usize) -> f64 {
    let bucket = (position * curve.len()) / expected_len.max(1);
    let target = curve[bucket.min(curve.len() - 1)];
    1.0 - (energy - target).abs()
}

/// Order the beam best-first with the deterministic tie-break chain:
/// cumulative score, then smaller last BPM delta, then larger harmony,
/// then lexicographic path of the last track
fn sort_beam(beam: &mut [Partial], candidates: &[Candidate]) {
    beam.sort_by(|a, b| {
        b.cumulative
            .total_cmp(&a.cumulative)
            .then_with(|| a.last_bpm_delta.total_cmp(&b.last_bpm_delta))
            .then_with(|| b.last_harmony.total_cmp(&a.last_harmony))
            .then_with(|| candidates[a.last()].path.cmp(&candidates[b.last()].path))
    });
}

/// Turn the winning sequence into the Playlist DTO
fn assemble_playlist(
    candidates: &[Candidate],
    result: &SequenceResult,
    spec: &GenerationSpec,
) -> Playlist {
    if result.order.is_empty() {
        return Playlist::empty(&spec.preset.name);
    }

    let entries: Vec<PlaylistEntry> = result
        .order
        .iter()
        .zip(&result.transitions)
        .map(|(&idx, &score)| {
            let c = &candidates[idx];
            PlaylistEntry {
                path: c.path.clone(),
                transition_score: score,
                bpm: c.bpm,
                camelot: c.camelot,
                title: c.title.clone(),
                artist: c.artist.clone(),
                duration_seconds: c.duration,
            }
        })
        .collect();

    let avg_bpm = entries.iter().map(|e| e.bpm).sum::<f64>() / entries.len() as f64;
    let energies: Vec<f64> = result
        .order
        .iter()
        .map(|&idx| candidates[idx].energy)
        .collect();

    Playlist {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        tracks: entries,
        metadata: PlaylistMetadata {
            total_duration_seconds: result.duration,
            avg_bpm,
            energy_curve: resample_curve(&energies, 16),
            preset_name: spec.preset.name.clone(),
            truncated: result.truncated,
            empty: false,
        },
    }
}

/// Derive the surprise RNG seed from a task id
pub fn rng_seed_from_task(task_id: Uuid) -> u64 {
    let bytes = task_id.as_bytes();
    u64::from_le_bytes(bytes[..8].try_into().expect("uuid has 16 bytes"))
}
