//! Content-addressed cache index
//!
//! On-disk layout under `<data_root>/cache/`:
//!
//! ```text
//! index.json                        path -> (content_id, size, mtime, version)
//! by_content/<cid[0:2]>/<cid>.json  one CacheEntry per content id
//! ```
//!
//! The canonical key is the content id (truncated SHA-256 of the file
//! bytes, 64-bit hex); the path index exists so the common lookup-by-path
//! does not re-hash. All file writes go through a temp file and an atomic
//! rename, so readers never observe a torn entry.

use crate::models::track::{Features, FileInfo, TrackTags};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// On-disk materialisation of one analysed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_id: String,
    /// Path the file had when the entry was written; the path index holds
    /// the current location
    pub path_at_write: PathBuf,
    pub file_size: u64,
    pub mtime: i64,
    pub analysis_version: u32,
    pub analysed_at: DateTime<Utc>,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    pub duration_seconds: f64,
    #[serde(default)]
    pub tags: TrackTags,
    pub features: Features,
}

impl CacheEntry {
    pub fn file_info(&self) -> FileInfo {
        FileInfo {
            file_size: self.file_size,
            mtime: self.mtime,
            format: self.format.clone(),
            bitrate: self.bitrate,
            sample_rate: self.sample_rate,
            duration_seconds: self.duration_seconds,
        }
    }
}

/// One row of `index.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathIndexEntry {
    pub content_id: String,
    pub file_size: u64,
    pub mtime: i64,
    pub analysis_version: u32,
}

/// `index.json` is the flat `path -> row` map, nothing else

/// In-memory view of the cache plus its persistence
pub struct CacheIndex {
    cache_dir: PathBuf,
    /// canonical path -> fast-reject row
    paths: RwLock<HashMap<PathBuf, PathIndexEntry>>,
    /// content id -> loaded entry
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    /// at most one write in flight per content id
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheIndex {
    /// Open (or create) the cache directory and load the index plus all
    /// entry files into memory
    pub fn open(cache_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(cache_dir.join("by_content"))?;

        let index_path = cache_dir.join("index.json");
        let paths = if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)?;
            match serde_json::from_str::<HashMap<PathBuf, PathIndexEntry>>(&raw) {
                Ok(paths) => paths,
                Err(err) => {
                    tracing::warn!(error = %err, "index.json unreadable, rebuilding from entries");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        let mut entries = HashMap::new();
        for shard in std::fs::read_dir(cache_dir.join("by_content"))? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in std::fs::read_dir(shard.path())? {
                let file = file?;
                let path = file.path();
                if path.extension().map(|e| e != "json").unwrap_or(true) {
                    continue;
                }
                match std::fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|raw| {
                        serde_json::from_str::<CacheEntry>(&raw).map_err(|e| e.to_string())
                    }) {
                    Ok(entry) => {
                        entries.insert(entry.content_id.clone(), Arc::new(entry));
                    }
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "skipping unreadable cache entry");
                    }
                }
            }
        }

        tracing::info!(
            paths = paths.len(),
            entries = entries.len(),
            cache_dir = %cache_dir.display(),
            "cache index loaded"
        );

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            paths: RwLock::new(paths),
            entries: RwLock::new(entries),
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, content_id: &str) -> PathBuf {
        let shard = &content_id[..content_id.len().min(2)];
        self.cache_dir
            .join("by_content")
            .join(shard)
            .join(format!("{content_id}.json"))
    }

    /// Look up the fast-reject row for a path
    pub fn path_entry(&self, path: &Path) -> Option<PathIndexEntry> {
        self.paths.read().get(path).cloned()
    }

    pub fn entry(&self, content_id: &str) -> Option<Arc<CacheEntry>> {
        self.entries.read().get(content_id).cloned()
    }

    /// Snapshot of all loaded entries with their current paths
    pub fn snapshot(&self) -> Vec<(PathBuf, Arc<CacheEntry>)> {
        let paths = self.paths.read();
        let entries = self.entries.read();
        paths
            .iter()
            .filter_map(|(path, row)| {
                entries
                    .get(&row.content_id)
                    .map(|entry| (path.clone(), Arc::clone(entry)))
            })
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Update the path index row for a file without touching its entry
    pub fn remember_path(&self, path: &Path, row: PathIndexEntry) {
        self.paths.write().insert(path.to_path_buf(), row);
        self.flush_index_best_effort();
    }

    /// Drop the path row (file vanished from disk); the content entry is
    /// retained for the TTL window in case the file comes back
    pub fn forget_path(&self, path: &Path) {
        if self.paths.write().remove(path).is_some() {
            self.flush_index_best_effort();
        }
    }

    /// Acquire the single-writer lock for a content id
    pub async fn write_lock(&self, content_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        Arc::clone(
            locks
                .entry(content_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Evict a write lock once its writer is done and nobody else holds it
    pub async fn release_write_lock(&self, content_id: &str) {
        let mut locks = self.write_locks.lock().await;
        if let Some(lock) = locks.get(content_id) {
            // strong count 1 means only the table holds it
            if Arc::strong_count(lock) == 1 {
                locks.remove(content_id);
            }
        }
    }

    /// Persist one entry and update both indexes. Caller must hold the
    /// per-content-id write lock.
    pub fn commit_entry(&self, path: &Path, entry: CacheEntry) -> std::io::Result<()> {
        let entry_path = self.entry_path(&entry.content_id);
        if let Some(parent) = entry_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(&entry)?;
        write_atomic(&entry_path, &payload)?;

        let row = PathIndexEntry {
            content_id: entry.content_id.clone(),
            file_size: entry.file_size,
            mtime: entry.mtime,
            analysis_version: entry.analysis_version,
        };

        {
            let mut paths = self.paths.write();
            let mut entries = self.entries.write();
            paths.insert(path.to_path_buf(), row);
            entries.insert(entry.content_id.clone(), Arc::new(entry));
        }
        self.flush_index_best_effort();
        Ok(())
    }

    /// Remove one entry from disk and memory; path rows pointing at it are
    /// dropped too. Returns the bytes freed.
    pub fn remove_entry(&self, content_id: &str) -> u64 {
        let entry_path = self.entry_path(content_id);
        let freed = std::fs::metadata(&entry_path).map(|m| m.len()).unwrap_or(0);
        if let Err(err) = std::fs::remove_file(&entry_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %entry_path.display(), error = %err, "failed to delete cache entry");
            }
        }
        {
            let mut paths = self.paths.write();
            let mut entries = self.entries.write();
            entries.remove(content_id);
            paths.retain(|_, row| row.content_id != content_id);
        }
        self.flush_index_best_effort();
        freed
    }

    /// Delete everything; returns the number of entries removed
    pub fn clear(&self) -> std::io::Result<usize> {
        let removed = {
            let mut paths = self.paths.write();
            let mut entries = self.entries.write();
            paths.clear();
            let count = entries.len();
            entries.clear();
            count
        };
        let by_content = self.cache_dir.join("by_content");
        if by_content.exists() {
            std::fs::remove_dir_all(&by_content)?;
        }
        std::fs::create_dir_all(&by_content)?;
        self.flush()?;
        Ok(removed)
    }

    /// Total size of all entry files on disk
    pub fn disk_usage(&self) -> u64 {
        let entries = self.entries.read();
        entries
            .keys()
            .map(|cid| {
                std::fs::metadata(self.entry_path(cid))
                    .map(|m| m.len())
                    .unwrap_or(0)
            })
            .sum()
    }

    /// Write `index.json` atomically
    pub fn flush(&self) -> std::io::Result<()> {
        let paths = self.paths.read().clone();
        let payload = serde_json::to_vec_pretty(&paths)?;
        write_atomic(&self.cache_dir.join("index.json"), &payload)
    }

    fn flush_index_best_effort(&self) {
        if let Err(err) = self.flush() {
            tracing::warn!(error = %err, "failed to flush cache index");
        }
    }
}

/// Temp file + rename so a crash never leaves a half-written JSON file
fn write_atomic(target: &Path, payload: &[u8]) -> std::io::Result<()> {
    let tmp = target.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp, payload)?;
    match std::fs::rename(&tmp, target) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = std::fs::remove_file(&tmp);
            Err(err)
        }
    }
}

/// Hash a file's bytes into the 64-bit hex content id
///
/// SHA-256 truncated to 8 bytes; chunked reads keep memory flat for large
/// files, and the work runs on the blocking pool.
pub async fn compute_content_id(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        let digest = hasher.finalize();
        Ok(hex_prefix(&digest, 8))
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

fn hex_prefix(bytes: &[u8], take: usize) -> String {
    bytes
        .iter()
        .take(take)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::track::{Confidence, EnergyPoint, Mood, MoodScores};
    use tempfile::TempDir;

    fn sample_entry(content_id: &str, path: &str) -> CacheEntry {
        let mut mood_scores = MoodScores::default();
        mood_scores.driving = 1.0;
        CacheEntry {
            content_id: content_id.to_string(),
            path_at_write: PathBuf::from(path),
            file_size: 1024,
            mtime: 1_700_000_000,
            analysis_version: crate::models::ANALYSIS_VERSION,
            analysed_at: Utc::now(),
            format: "wav".to_string(),
            bitrate: None,
            sample_rate: Some(44_100),
            duration_seconds: 10.0,
            tags: TrackTags::default(),
            features: Features {
                bpm: 124.0,
                key: "Bbm".to_string(),
                camelot: "8A".parse().unwrap(),
                energy: 0.6,
                valence: 0.5,
                danceability: 0.7,
                acousticness: 0.1,
                instrumentalness: 0.9,
                energy_timeseries: (0..10)
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

    #[test]
    fn test_commit_then_reopen() {
        let dir = TempDir::new().unwrap();
        let entry = sample_entry("deadbeefdeadbeef", "/music/a.wav");

        {
            let index = CacheIndex::open(dir.path()).unwrap();
            index
                .commit_entry(Path::new("/music/a.wav"), entry.clone())
                .unwrap();
        }

        let reopened = CacheIndex::open(dir.path()).unwrap();
        let row = reopened.path_entry(Path::new("/music/a.wav")).unwrap();
        assert_eq!(row.content_id, "deadbeefdeadbeef");
        let loaded = reopened.entry("deadbeefdeadbeef").unwrap();
        assert_eq!(*loaded, entry);
    }

    #[test]
    fn test_entry_sharding_layout() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(dir.path()).unwrap();
        index
            .commit_entry(Path::new("/m/x.wav"), sample_entry("abcdef0123456789", "/m/x.wav"))
            .unwrap();
        assert!(dir
            .path()
            .join("by_content/ab/abcdef0123456789.json")
            .exists());
        assert!(dir.path().join("index.json").exists());
    }

    #[test]
    fn test_remove_entry_drops_paths() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(dir.path()).unwrap();
        index
            .commit_entry(Path::new("/m/x.wav"), sample_entry("aa00aa00aa00aa00", "/m/x.wav"))
            .unwrap();

        index.remove_entry("aa00aa00aa00aa00");
        assert!(index.entry("aa00aa00aa00aa00").is_none());
        assert!(index.path_entry(Path::new("/m/x.wav")).is_none());
        assert!(!dir
            .path()
            .join("by_content/aa/aa00aa00aa00aa00.json")
            .exists());
    }

    #[test]
    fn test_clear_empties_everything() {
        let dir = TempDir::new().unwrap();
        let index = CacheIndex::open(dir.path()).unwrap();
        index
            .commit_entry(Path::new("/m/x.wav"), sample_entry("1111222233334444", "/m/x.wav"))
            .unwrap();
        index
            .commit_entry(Path::new("/m/y.wav"), sample_entry("5555666677778888", "/m/y.wav"))
            .unwrap();

        let removed = index.clear().unwrap();
        assert_eq!(removed, 2);
        assert_eq!(index.entry_count(), 0);
        assert!(index.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_content_id_stable_and_content_addressed() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let id_a = compute_content_id(&a).await.unwrap();
        let id_b = compute_content_id(&b).await.unwrap();
        assert_eq!(id_a, id_b, "identical bytes must share a content id");
        assert_eq!(id_a.len(), 16, "64-bit hex digest");

        std::fs::write(&b, b"different bytes").unwrap();
        let id_b2 = compute_content_id(&b).await.unwrap();
        assert_ne!(id_a, id_b2);
    }

    #[tokio::test]
    async fn test_write_lock_single_flight() {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(CacheIndex::open(dir.path()).unwrap());

        let lock = index.write_lock("cafebabecafebabe").await;
        let guard = lock.lock().await;

        let lock2 = index.write_lock("cafebabecafebabe").await;
        assert!(lock2.try_lock().is_err(), "same key must serialise");

        let other = index.write_lock("0123456789abcdef").await;
        assert!(other.try_lock().is_ok(), "different keys are independent");

        drop(guard);
        index.release_write_lock("cafebabecafebabe").await;
    }
}
