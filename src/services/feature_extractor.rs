//! Feature extractor boundary
//!
//! The DSP itself lives outside this crate. The core consumes it through
//! the [`FeatureExtractor`] trait: a synchronous, CPU-bound call that must
//! be safe from any worker thread and numerically stable across calls on
//! identical bytes (BPM within ±0.1, energy within ±0.01) — the cache
//! relies on that stability.

use crate::models::track::{EnergyPoint, TrackTags, BPM_MAX, BPM_MIN};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Extraction failure classes
#[derive(Debug, Error)]
pub enum ExtractError {
    /// File extension or container not in the supported set
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// File recognised but undecodable
    #[error("corrupt file: {0}")]
    CorruptFile(String),

    /// Extraction exceeded the per-file analysis timeout
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    /// Filesystem trouble reading the input
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Extractor contract violation or unexpected failure
    #[error("extractor internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Transient failures are worth retrying with backoff; everything else
    /// fails the file immediately
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    pub fn code(&self) -> crate::error::ErrorCode {
        use crate::error::ErrorCode;
        match self {
            ExtractError::UnsupportedFormat(_) => ErrorCode::UnsupportedFormat,
            ExtractError::CorruptFile(_) => ErrorCode::CorruptFile,
            ExtractError::Timeout(_) => ErrorCode::Timeout,
            ExtractError::Io(_) => ErrorCode::IoError,
            ExtractError::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// Options passed through to the extractor
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub analysis_timeout: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            analysis_timeout: Duration::from_secs(300),
        }
    }
}

/// Raw features as the extractor reports them, before mood classification
/// and key/Camelot reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeatures {
    pub bpm: f64,
    /// Key name, e.g. "Am"; reconciled against the Camelot table downstream
    pub key: String,
    pub energy: f64,
    pub valence: f64,
    pub danceability: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub energy_timeseries: Vec<EnergyPoint>,
    pub stride_seconds: f64,
    pub confidence_bpm: f64,
    pub confidence_key: f64,
    pub confidence_energy: f64,
}

impl RawFeatures {
    /// Enforce the extractor's numeric contract before anything is cached
    pub fn check_contract(&self) -> Result<(), ExtractError> {
        if !(BPM_MIN..=BPM_MAX).contains(&self.bpm) {
            return Err(ExtractError::Internal(format!(
                "bpm {} outside [{}, {}]",
                self.bpm, BPM_MIN, BPM_MAX
            )));
        }
        if !self.bpm.is_finite() || !self.energy.is_finite() {
            return Err(ExtractError::Internal("non-finite feature value".to_string()));
        }
        Ok(())
    }
}

/// Everything the extractor learns about one file
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub duration_seconds: f64,
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u32>,
    pub tags: TrackTags,
    pub features: RawFeatures,
}

/// The external DSP boundary
pub trait FeatureExtractor: Send + Sync + 'static {
    /// Extract features for one file. Synchronous and CPU-bound; callers
    /// run it on a blocking thread and enforce the timeout around it.
    fn extract(&self, path: &Path, options: &ExtractOptions) -> Result<Extraction, ExtractError>;
}

/// Async adapter the worker pool calls: runs the extractor on the blocking
/// pool and converts budget exhaustion into [`ExtractError::Timeout`].
///
/// An in-flight extraction is allowed to run to completion after a timeout
/// or cancel; its result is simply discarded.
#[derive(Clone)]
pub struct ExtractorHandle {
    inner: Arc<dyn FeatureExtractor>,
    options: ExtractOptions,
}

impl ExtractorHandle {
    pub fn new(extractor: Arc<dyn FeatureExtractor>, options: ExtractOptions) -> Self {
        Self {
            inner: extractor,
            options,
        }
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    pub async fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let extractor = Arc::clone(&self.inner);
        let options = self.options.clone();
        let owned_path: PathBuf = path.to_path_buf();
        let budget = options.analysis_timeout;

        let work = tokio::task::spawn_blocking(move || extractor.extract(&owned_path, &options));

        match tokio::time::timeout(budget, work).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ExtractError::Internal(format!(
                "extractor task panicked: {join_err}"
            ))),
            Err(_) => Err(ExtractError::Timeout(budget)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SleepyExtractor(Duration);

    impl FeatureExtractor for SleepyExtractor {
        fn extract(
            &self,
            _path: &Path,
            _options: &ExtractOptions,
        ) -> Result<Extraction, ExtractError> {
            std::thread::sleep(self.0);
            Err(ExtractError::Internal("should not be reached in time".into()))
        }
    }

    #[tokio::test]
    async fn test_timeout_enforced() {
        let handle = ExtractorHandle::new(
            Arc::new(SleepyExtractor(Duration::from_millis(500))),
            ExtractOptions {
                analysis_timeout: Duration::from_millis(50),
            },
        );
        let err = handle.extract(Path::new("/tmp/x.wav")).await.unwrap_err();
        assert!(matches!(err, ExtractError::Timeout(_)));
    }

    #[test]
    fn test_transient_classification() {
        let timed_out: ExtractError =
            std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk").into();
        assert!(timed_out.is_transient());

        let missing: ExtractError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(!missing.is_transient());

        assert!(!ExtractError::CorruptFile("header".into()).is_transient());
        assert!(!ExtractError::Timeout(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn test_contract_rejects_out_of_range_bpm() {
        let features = RawFeatures {
            bpm: 300.0,
            key: "Am".into(),
            energy: 0.5,
            valence: 0.5,
            danceability: 0.5,
            acousticness: 0.5,
            instrumentalness: 0.5,
            energy_timeseries: Vec::new(),
            stride_seconds: 1.0,
            confidence_bpm: 1.0,
            confidence_key: 1.0,
            confidence_energy: 1.0,
        };
        assert!(features.check_contract().is_err());
    }
}
