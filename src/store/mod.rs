//! Feature store
//!
//! Persists extracted features keyed by content, answers track queries and
//! enforces cache consistency. The store owns `<data_root>/cache/` and is
//! the only writer inside it.

pub mod filter;
pub mod index;

use crate::models::track::{StoreStats, Track, ANALYSIS_VERSION};
use crate::models::Camelot;
use chrono::{Duration as ChronoDuration, Utc};
use filter::{compare_tracks, paginate, Page, SortBy, SortOrder, TrackFilter};
use index::{CacheEntry, CacheIndex, PathIndexEntry};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("track not found: {0}")]
    NotFound(PathBuf),

    #[error("corrupt cache entry for {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for crate::error::AppError {
    fn from(err: StoreError) -> Self {
        use crate::error::{AppError, ErrorCode};
        match err {
            StoreError::NotFound(path) => {
                AppError::not_found(format!("track not found: {}", path.display()))
            }
            StoreError::Corrupt { .. } => AppError::Coded(ErrorCode::Internal, err.to_string()),
            StoreError::Io(io) => AppError::Io(io),
        }
    }
}

/// Outcome of a cache lookup on the analysis path
#[derive(Debug)]
pub enum Lookup {
    /// Valid entry; analysis can be skipped
    Hit(Box<CacheEntry>),
    /// No valid entry; the content id is carried over when it was already
    /// computed so the worker does not hash twice
    Miss { content_id: Option<String> },
}

/// Report from a cleanup pass
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct CleanupReport {
    pub removed_entries: usize,
    pub freed_bytes: u64,
}

/// The feature store
pub struct Store {
    index: CacheIndex,
    ttl: ChronoDuration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Store {
    /// Load indexes and verify the cache directory is writable
    pub fn init(cache_dir: &Path, cache_ttl_days: u32) -> Result<Self, StoreError> {
        let index = CacheIndex::open(cache_dir)?;

        // A store that cannot write is a systemic failure, caught at startup
        let probe = cache_dir.join(".write_probe");
        std::fs::write(&probe, b"ok")?;
        std::fs::remove_file(&probe)?;

        Ok(Self {
            index,
            ttl: ChronoDuration::days(cache_ttl_days as i64),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Flush pending index state; bounded runtime, called on shutdown
    pub fn shutdown(&self) -> Result<(), StoreError> {
        self.index.flush()?;
        tracing::info!("store index flushed");
        Ok(())
    }

    /// The analysis-path read: stat, fast-reject via the path index, rehash
    /// only when needed, then validate the entry's version and age
    pub async fn lookup(&self, path: &Path) -> Result<Lookup, StoreError> {
        let metadata = std::fs::metadata(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.to_path_buf())
            } else {
                StoreError::Io(err)
            }
        })?;
        let file_size = metadata.len();
        let mtime = file_mtime(&metadata);

        let content_id = match self.index.path_entry(path) {
            Some(row) if row.file_size == file_size && row.mtime == mtime => row.content_id,
            _ => {
                // Stat mismatch or unknown path: re-hash and refresh the row
                let content_id = index::compute_content_id(path).await?;
                self.index.remember_path(
                    path,
                    PathIndexEntry {
                        content_id: content_id.clone(),
                        file_size,
                        mtime,
                        analysis_version: 0, // unknown until an entry is seen
                    },
                );
                content_id
            }
        };

        match self.index.entry(&content_id) {
            Some(entry) if self.entry_valid(&entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Lookup::Hit(Box::new((*entry).clone())))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(Lookup::Miss {
                    content_id: Some(content_id),
                })
            }
        }
    }

    fn entry_valid(&self, entry: &CacheEntry) -> bool {
        if entry.analysis_version < ANALYSIS_VERSION {
            return false;
        }
        Utc::now().signed_duration_since(entry.analysed_at) <= self.ttl
    }

    /// Persist a freshly analysed entry. Writes for the same content id are
    /// serialised; last commit wins, which is safe because the extractor is
    /// stability-bounded.
    pub async fn write_entry(&self, path: &Path, entry: CacheEntry) -> Result<(), StoreError> {
        let content_id = entry.content_id.clone();
        let lock = self.index.write_lock(&content_id).await;
        {
            let _guard = lock.lock().await;
            self.index.commit_entry(path, entry)?;
        }
        drop(lock);
        self.index.release_write_lock(&content_id).await;
        Ok(())
    }

    /// Drop path rows under the scanned roots whose files were not seen;
    /// content entries stay on disk until the TTL sweeps them
    pub fn retire_missing(&self, roots: &[PathBuf], seen: &BTreeSet<PathBuf>) {
        let stale: Vec<PathBuf> = self
            .index
            .snapshot()
            .into_iter()
            .map(|(path, _)| path)
            .filter(|path| {
                roots.iter().any(|root| path.starts_with(root)) && !seen.contains(path)
            })
            .collect();
        for path in stale {
            tracing::debug!(path = %path.display(), "retiring path for vanished file");
            self.index.forget_path(&path);
        }
    }

    /// Materialise the Track view for a cached path
    pub fn get_by_path(&self, path: &Path) -> Result<Track, StoreError> {
        let row = self
            .index
            .path_entry(path)
            .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))?;
        let entry = self
            .index
            .entry(&row.content_id)
            .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))?;
        self.materialise(path, &entry)
    }

    fn materialise(&self, path: &Path, entry: &CacheEntry) -> Result<Track, StoreError> {
        // key/camelot disagreement at read time is a fatal store error
        match Camelot::from_key(&entry.features.key) {
            Some(from_key) if from_key == entry.features.camelot => {}
            _ => {
                return Err(StoreError::Corrupt {
                    path: path.to_path_buf(),
                    reason: format!(
                        "key {} does not agree with camelot {}",
                        entry.features.key, entry.features.camelot
                    ),
                });
            }
        }
        Ok(Track {
            path: path.to_path_buf(),
            content_id: entry.content_id.clone(),
            file: entry.file_info(),
            tags: entry.tags.clone(),
            features: Some(entry.features.clone()),
            analysed_at: Some(entry.analysed_at),
        })
    }

    /// All materialisable tracks, unfiltered and unsorted
    fn all_tracks(&self) -> Vec<Track> {
        self.index
            .snapshot()
            .into_iter()
            .filter_map(|(path, entry)| match self.materialise(&path, &entry) {
                Ok(track) => Some(track),
                Err(err) => {
                    tracing::error!(error = %err, "dropping unreadable store row");
                    None
                }
            })
            .collect()
    }

    /// Every track matching the filter, in deterministic path order;
    /// the sequencing engine wants the whole library, not a page
    pub fn tracks_matching(&self, filter: &TrackFilter) -> Vec<Track> {
        let mut tracks: Vec<Track> = self
            .all_tracks()
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        tracks.sort_by(|a, b| a.path.cmp(&b.path));
        tracks
    }

    /// Filtered, sorted, paginated listing with the pre-pagination total
    pub fn list(
        &self,
        filter: &TrackFilter,
        sort_by: SortBy,
        order: SortOrder,
        page: usize,
        per_page: usize,
    ) -> (Vec<Track>, usize, Page) {
        let mut tracks: Vec<Track> = self
            .all_tracks()
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        tracks.sort_by(|a, b| compare_tracks(a, b, sort_by, order));

        let total = tracks.len();
        let page = paginate(total, page, per_page);
        let items = tracks
            .into_iter()
            .skip(page.offset)
            .take(page.per_page)
            .collect();
        (items, total, page)
    }

    /// k-nearest neighbours by weighted feature distance
    pub fn similar(
        &self,
        path: &Path,
        k: usize,
        threshold: f64,
    ) -> Result<Vec<(Track, f64)>, StoreError> {
        let reference = self.get_by_path(path)?;
        let mut scored: Vec<(Track, f64)> = self
            .all_tracks()
            .into_iter()
            .filter(|t| t.path != reference.path)
            .filter_map(|t| {
                let score = feature_similarity(&reference, &t)?;
                (score >= threshold).then_some((t, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.path.cmp(&b.0.path)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Library-wide aggregates
    pub fn stats(&self) -> StoreStats {
        let tracks = self.all_tracks();
        let mut stats = StoreStats {
            total_tracks: tracks.len() as u64,
            analysed_tracks: tracks.iter().filter(|t| t.features.is_some()).count() as u64,
            cache_size_bytes: self.index.disk_usage(),
            ..Default::default()
        };
        for track in &tracks {
            if let Some(features) = &track.features {
                *stats
                    .bpm_histogram
                    .entry(features.bpm.round() as u32)
                    .or_insert(0) += 1;
                *stats
                    .mood_histogram
                    .entry(features.mood.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        stats.cache_hits = hits;
        stats.cache_misses = misses;
        stats.cache_hit_rate = if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64
        } else {
            0.0
        };
        stats
    }

    /// Remove entries older than the given age, then evict oldest-first
    /// until total size fits under the byte budget
    pub fn cleanup(
        &self,
        older_than_days: Option<u32>,
        max_size_bytes: Option<u64>,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut entries: Vec<(String, chrono::DateTime<Utc>)> = self
            .index
            .snapshot()
            .into_iter()
            .map(|(_, e)| (e.content_id.clone(), e.analysed_at))
            .collect();
        entries.sort_by_key(|(_, at)| *at);
        entries.dedup_by(|a, b| a.0 == b.0);

        if let Some(days) = older_than_days {
            let cutoff = Utc::now() - ChronoDuration::days(days as i64);
            for (cid, analysed_at) in &entries {
                if *analysed_at < cutoff {
                    report.freed_bytes += self.index.remove_entry(cid);
                    report.removed_entries += 1;
                }
            }
        }

        if let Some(budget) = max_size_bytes {
            let mut usage = self.index.disk_usage();
            for (cid, _) in &entries {
                if usage <= budget {
                    break;
                }
                if self.index.entry(cid).is_some() {
                    let freed = self.index.remove_entry(cid);
                    usage = usage.saturating_sub(freed);
                    report.freed_bytes += freed;
                    report.removed_entries += 1;
                }
            }
        }

        tracing::info!(
            removed = report.removed_entries,
            freed_bytes = report.freed_bytes,
            "cache cleanup finished"
        );
        report
    }

    /// Empty the cache entirely
    pub fn clear(&self) -> Result<usize, StoreError> {
        let removed = self.index.clear()?;
        tracing::info!(removed, "cache cleared");
        Ok(removed)
    }

    pub fn entry_count(&self) -> usize {
        self.index.entry_count()
    }
}

/// Seconds-since-epoch mtime from stat; files without one read as 0
pub fn file_mtime(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Weighted similarity over (bpm, energy, valence, danceability, mode,
/// key-circle position); 1.0 is identical, 0.0 maximally far.
///
/// The key embeds as an angle so 12A and 1A are adjacent.
fn feature_similarity(a: &Track, b: &Track) -> Option<f64> {
    let fa = a.features.as_ref()?;
    let fb = b.features.as_ref()?;

    let bpm_span = crate::models::track::BPM_MAX - crate::models::track::BPM_MIN;
    let d_bpm = ((fa.bpm - fb.bpm) / bpm_span).abs().min(1.0);
    let d_energy = (fa.energy - fb.energy).abs();
    let d_valence = (fa.valence - fb.valence).abs();
    let d_dance = (fa.danceability - fb.danceability).abs();
    let d_mode = if fa.camelot.is_minor() == fb.camelot.is_minor() {
        0.0
    } else {
        1.0
    };
    let angular = {
        let diff = (fa.camelot.angle() - fb.camelot.angle()).abs();
        let diff = diff.min(std::f64::consts::TAU - diff);
        diff / std::f64::consts::PI
    };

    let distance = 0.25 * d_bpm
        + 0.20 * d_energy
        + 0.15 * d_valence
        + 0.15 * d_dance
        + 0.05 * d_mode
        + 0.20 * angular;
    Some((1.0 - distance).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::track::{Confidence, EnergyPoint, Features, Mood, MoodScores, TrackTags};
    use tempfile::TempDir;

    fn entry_for(path: &Path, content_id: &str, bpm: f64, camelot: &str) -> CacheEntry {
        let metadata = std::fs::metadata(path).unwrap();
        let cam: Camelot = camelot.parse().unwrap();
        let mut mood_scores = MoodScores::default();
        mood_scores.driving = 1.0;
        CacheEntry {
            content_id: content_id.to_string(),
            path_at_write: path.to_path_buf(),
            file_size: metadata.len(),
            mtime: file_mtime(&metadata),
            analysis_version: ANALYSIS_VERSION,
            analysed_at: Utc::now(),
            format: "wav".to_string(),
            bitrate: None,
            sample_rate: Some(44_100),
            duration_seconds: 30.0,
            tags: TrackTags::default(),
            features: Features {
                bpm,
                key: cam.key_name().to_string(),
                camelot: cam,
                energy: 0.5,
                valence: 0.5,
                danceability: 0.5,
                acousticness: 0.2,
                instrumentalness: 0.8,
                energy_timeseries: (0..30)
                    .map(|i| EnergyPoint {
                        t: i as f64,
                        v: 0.5,
                    })
                    .collect(),
                stride_seconds: 1.0,
                confidence: Confidence::default(),
                mood: Mood::Driving,
                mood_scores,
            },
        }
    }

    async fn store_with_file(dir: &TempDir, name: &str, bytes: &[u8]) -> (Store, PathBuf) {
        let music = dir.path().join("music");
        std::fs::create_dir_all(&music).unwrap();
        let file = music.join(name);
        std::fs::write(&file, bytes).unwrap();
        let store = Store::init(&dir.path().join("cache"), 30).unwrap();
        (store, file)
    }

    #[tokio::test]
    async fn test_lookup_miss_then_hit() {
        let dir = TempDir::new().unwrap();
        let (store, file) = store_with_file(&dir, "a.wav", b"some audio bytes").await;

        let Lookup::Miss { content_id } = store.lookup(&file).await.unwrap() else {
            panic!("expected miss on cold cache");
        };
        let cid = content_id.unwrap();

        store
            .write_entry(&file, entry_for(&file, &cid, 124.0, "8A"))
            .await
            .unwrap();

        match store.lookup(&file).await.unwrap() {
            Lookup::Hit(entry) => assert_eq!(entry.content_id, cid),
            other => panic!("expected hit, got {:?}", other),
        }

        let stats = store.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn test_lookup_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = Store::init(&dir.path().join("cache"), 30).unwrap();
        let err = store
            .lookup(Path::new("/nope/missing.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stale_version_is_miss() {
        let dir = TempDir::new().unwrap();
        let (store, file) = store_with_file(&dir, "a.wav", b"bytes").await;
        let Lookup::Miss { content_id } = store.lookup(&file).await.unwrap() else {
            panic!();
        };
        let cid = content_id.unwrap();

        let mut entry = entry_for(&file, &cid, 124.0, "8A");
        entry.analysis_version = ANALYSIS_VERSION - 1;
        store.write_entry(&file, entry).await.unwrap();

        assert!(matches!(
            store.lookup(&file).await.unwrap(),
            Lookup::Miss { .. }
        ));
    }

    #[tokio::test]
    async fn test_content_change_invalidates() {
        let dir = TempDir::new().unwrap();
        let (store, file) = store_with_file(&dir, "a.wav", b"original contents").await;
        let Lookup::Miss { content_id } = store.lookup(&file).await.unwrap() else {
            panic!();
        };
        store
            .write_entry(&file, entry_for(&file, &content_id.unwrap(), 124.0, "8A"))
            .await
            .unwrap();

        // Different bytes and different length change size, so the fast
        // path rejects and the rehash lands on a new content id
        std::fs::write(&file, b"totally different bytes!").unwrap();
        assert!(matches!(
            store.lookup(&file).await.unwrap(),
            Lookup::Miss { .. }
        ));
    }

    #[tokio::test]
    async fn test_get_by_path_detects_key_camelot_mismatch() {
        let dir = TempDir::new().unwrap();
        let (store, file) = store_with_file(&dir, "a.wav", b"bytes").await;
        let Lookup::Miss { content_id } = store.lookup(&file).await.unwrap() else {
            panic!();
        };
        let mut entry = entry_for(&file, &content_id.unwrap(), 124.0, "8A");
        entry.features.key = "Am".to_string(); // 1A, disagrees with 8A
        store.write_entry(&file, entry).await.unwrap();

        let err = store.get_by_path(&file).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let dir = TempDir::new().unwrap();
        let music = dir.path().join("music");
        std::fs::create_dir_all(&music).unwrap();
        let store = Store::init(&dir.path().join("cache"), 30).unwrap();

        for (i, bpm) in [120.0, 124.0, 128.0, 180.0].iter().enumerate() {
            let file = music.join(format!("{i}.wav"));
            std::fs::write(&file, format!("file {i}")).unwrap();
            let Lookup::Miss { content_id } = store.lookup(&file).await.unwrap() else {
                panic!();
            };
            store
                .write_entry(&file, entry_for(&file, &content_id.unwrap(), *bpm, "8A"))
                .await
                .unwrap();
        }

        let filter = TrackFilter {
            min_bpm: Some(118.0),
            max_bpm: Some(130.0),
            ..Default::default()
        };
        let (items, total, page) =
            store.list(&filter, SortBy::Bpm, SortOrder::Asc, 1, 2);
        assert_eq!(total, 3);
        assert_eq!(items.len(), 2);
        assert_eq!(page.total_pages, 2);
        assert_eq!(items[0].features.as_ref().unwrap().bpm, 120.0);
    }

    #[tokio::test]
    async fn test_similar_prefers_nearby_keys() {
        let dir = TempDir::new().unwrap();
        let music = dir.path().join("music");
        std::fs::create_dir_all(&music).unwrap();
        let store = Store::init(&dir.path().join("cache"), 30).unwrap();

        for (name, bpm, camelot) in
            [("seed", 124.0, "8A"), ("close", 125.0, "9A"), ("far", 125.0, "2A")]
        {
            let file = music.join(format!("{name}.wav"));
            std::fs::write(&file, name).unwrap();
            let Lookup::Miss { content_id } = store.lookup(&file).await.unwrap() else {
                panic!();
            };
            store
                .write_entry(&file, entry_for(&file, &content_id.unwrap(), bpm, camelot))
                .await
                .unwrap();
        }

        let seed = music.join("seed.wav");
        let similar = store.similar(&seed, 2, 0.0).unwrap();
        assert_eq!(similar.len(), 2);
        assert!(similar[0].0.path.ends_with("close.wav"));
        assert!(similar[0].1 > similar[1].1);
    }

    #[tokio::test]
    async fn test_cleanup_by_age_and_size() {
        let dir = TempDir::new().unwrap();
        let music = dir.path().join("music");
        std::fs::create_dir_all(&music).unwrap();
        let store = Store::init(&dir.path().join("cache"), 30).unwrap();

        for i in 0..3 {
            let file = music.join(format!("{i}.wav"));
            std::fs::write(&file, format!("file {i}")).unwrap();
            let Lookup::Miss { content_id } = store.lookup(&file).await.unwrap() else {
                panic!();
            };
            let mut entry = entry_for(&file, &content_id.unwrap(), 124.0, "8A");
            if i == 0 {
                entry.analysed_at = Utc::now() - ChronoDuration::days(90);
            }
            store.write_entry(&file, entry).await.unwrap();
        }

        let report = store.cleanup(Some(30), None);
        assert_eq!(report.removed_entries, 1);
        assert_eq!(store.entry_count(), 2);

        let report = store.cleanup(None, Some(0));
        assert_eq!(report.removed_entries, 2);
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_retire_missing_keeps_entry() {
        let dir = TempDir::new().unwrap();
        let (store, file) = store_with_file(&dir, "a.wav", b"bytes").await;
        let Lookup::Miss { content_id } = store.lookup(&file).await.unwrap() else {
            panic!();
        };
        let cid = content_id.unwrap();
        store
            .write_entry(&file, entry_for(&file, &cid, 124.0, "8A"))
            .await
            .unwrap();

        std::fs::remove_file(&file).unwrap();
        let roots = vec![file.parent().unwrap().to_path_buf()];
        store.retire_missing(&roots, &BTreeSet::new());

        assert!(store.get_by_path(&file).is_err());
        // entry retained for the TTL window
        assert_eq!(store.entry_count(), 1);
    }
}
