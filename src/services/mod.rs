//! Service layer: scanning, extraction, task management, sequencing, export

pub mod analysis_pipeline;
pub mod analyzer_client;
pub mod exporter;
pub mod feature_extractor;
pub mod file_scanner;
pub mod mood_classifier;
pub mod playlist_engine;
pub mod preset_library;
pub mod task_manager;
pub mod worker_pool;

pub use analyzer_client::AnalyzerClient;
pub use exporter::ExportFormat;
pub use feature_extractor::{ExtractError, ExtractOptions, Extraction, ExtractorHandle, FeatureExtractor, RawFeatures};
pub use file_scanner::{FileScanner, ScanRequest};
pub use playlist_engine::{GenerationSpec, PlaylistEngine};
pub use preset_library::PresetLibrary;
pub use task_manager::{ResultStatus, TaskHandle, TaskManager, TaskOutcome};
pub use worker_pool::WorkerPool;
