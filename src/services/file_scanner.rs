//! Audio file discovery
//!
//! Produces a finite, de-duplicated, lexicographically ordered list of
//! candidate files for an analysis request. Symlinks are resolved once at
//! the roots and never followed deeper, which makes cycles impossible.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Maximum directory recursion depth
pub const MAX_SCAN_DEPTH: usize = 32;

/// Extensions the analyzer accepts
pub const SUPPORTED_EXTENSIONS: [&str; 11] = [
    "mp3", "flac", "ogg", "oga", "m4a", "aac", "mp4", "wav", "opus", "wma", "aiff",
];

/// Fatal scan failures; these fail the whole task
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("directory nesting exceeds {MAX_SCAN_DEPTH} levels under {0}")]
    TooDeep(PathBuf),

    #[error("io error scanning {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Non-fatal problems, surfaced on the task's error list
#[derive(Debug, Clone)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
}

/// What to scan
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub directories: Vec<PathBuf>,
    pub file_paths: Vec<PathBuf>,
    pub recursive: bool,
    /// Wildcard patterns on the filename; empty means match everything
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

/// Scan result: ordered candidates plus any skipped subtrees
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Candidates in lexicographic canonical-path order
    pub files: Vec<PathBuf>,
    pub warnings: Vec<ScanWarning>,
}

/// Audio file scanner
pub struct FileScanner {
    min_file_bytes: u64,
    max_file_bytes: u64,
}

impl FileScanner {
    pub fn new(min_file_kb: u64, max_file_size_mb: u64) -> Self {
        Self {
            min_file_bytes: min_file_kb * 1024,
            max_file_bytes: max_file_size_mb * 1024 * 1024,
        }
    }

    /// Run a scan request to completion
    pub fn scan(&self, request: &ScanRequest) -> Result<ScanOutcome, ScanError> {
        let mut seen = BTreeSet::new();
        let mut warnings = Vec::new();

        for root in &request.directories {
            let canonical = root
                .canonicalize()
                .map_err(|_| ScanError::RootNotFound(root.clone()))?;
            if !canonical.is_dir() {
                return Err(ScanError::RootNotFound(root.clone()));
            }
            self.scan_directory(&canonical, request, &mut seen, &mut warnings)?;
        }

        for file in &request.file_paths {
            let canonical = file
                .canonicalize()
                .map_err(|_| ScanError::RootNotFound(file.clone()))?;
            match self.candidate_check(&canonical, request) {
                Ok(true) => {
                    seen.insert(canonical);
                }
                Ok(false) => {}
                Err(message) => warnings.push(ScanWarning {
                    path: canonical,
                    message,
                }),
            }
        }

        Ok(ScanOutcome {
            files: seen.into_iter().collect(),
            warnings,
        })
    }

    fn scan_directory(
        &self,
        root: &Path,
        request: &ScanRequest,
        seen: &mut BTreeSet<PathBuf>,
        warnings: &mut Vec<ScanWarning>,
    ) -> Result<(), ScanError> {
        let max_depth = if request.recursive { MAX_SCAN_DEPTH } else { 1 };

        // Walk one level past the bound so exceedance is observable
        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(max_depth + 1)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| p.to_path_buf())
                        .unwrap_or_else(|| root.to_path_buf());
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable entry");
                    warnings.push(ScanWarning {
                        path,
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            if request.recursive && entry.depth() > MAX_SCAN_DEPTH {
                return Err(ScanError::TooDeep(root.to_path_buf()));
            }

            if !entry.file_type().is_file() || entry.depth() > max_depth {
                continue;
            }

            let path = entry.path().to_path_buf();
            match self.candidate_check(&path, request) {
                Ok(true) => {
                    seen.insert(path);
                }
                Ok(false) => {}
                Err(message) => warnings.push(ScanWarning { path, message }),
            }
        }

        Ok(())
    }

    /// Apply the candidate predicate: supported extension, size window,
    /// include/exclude patterns. `Err` carries a warning message for files
    /// that could not be inspected.
    fn candidate_check(&self, path: &Path, request: &ScanRequest) -> Result<bool, String> {
        let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_lowercase()) else {
            return Ok(false);
        };
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(false);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if !request.include_patterns.is_empty()
            && !request
                .include_patterns
                .iter()
                .any(|p| wildcard_match(p, &name))
        {
            return Ok(false);
        }
        if request
            .exclude_patterns
            .iter()
            .any(|p| wildcard_match(p, &name))
        {
            return Ok(false);
        }

        let metadata =
            std::fs::metadata(path).map_err(|e| format!("cannot stat file: {e}"))?;
        let size = metadata.len();
        if size < self.min_file_bytes || size > self.max_file_bytes {
            return Ok(false);
        }

        Ok(true)
    }
}

/// Case-insensitive wildcard match supporting `*` and `?`
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();

    // Iterative glob with single backtrack point per `*`
    let (mut p, mut n) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((star_p, star_n)) = star {
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
