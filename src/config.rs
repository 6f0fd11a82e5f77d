//! Runtime settings resolved from the environment
//!
//! All keys are optional; defaults match the documented resource model.
//! File-based configuration is owned by whatever wraps this service.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Resolved runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Owns `cache/`, `presets/` and `exports/`
    pub data_root: PathBuf,
    /// Informational only; reported by /health
    pub music_library_path: Option<PathBuf>,
    pub max_workers: usize,
    pub max_file_size_mb: u64,
    pub min_file_kb: u64,
    pub cache_ttl_days: u32,
    pub analysis_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub debug: bool,
    /// Command for the external feature analyzer
    pub analyzer_cmd: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8023,
            data_root: PathBuf::from("./mixdeck_data"),
            music_library_path: None,
            max_workers: num_cpus::get().min(8).max(1),
            max_file_size_mb: 500,
            min_file_kb: 16,
            cache_ttl_days: 30,
            analysis_timeout_secs: 300,
            generation_timeout_secs: 60,
            debug: false,
            analyzer_cmd: "mixdeck-analyzer".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map(Some).map_err(|e: T::Err| {
                ConfigError::Invalid {
                    key,
                    value: raw,
                    reason: e.to_string(),
                }
            })
        }
        _ => Ok(None),
    }
}

impl Settings {
    /// Read recognised keys from the environment, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Settings::default();

        if let Ok(host) = std::env::var("HOST") {
            if !host.trim().is_empty() {
                settings.host = host.trim().to_string();
            }
        }
        if let Some(port) = parse_env::<u16>("PORT")? {
            settings.port = port;
        }
        if let Ok(root) = std::env::var("DATA_ROOT") {
            if !root.trim().is_empty() {
                settings.data_root = PathBuf::from(root.trim());
            }
        }
        if let Ok(path) = std::env::var("MUSIC_LIBRARY_PATH") {
            if !path.trim().is_empty() {
                settings.music_library_path = Some(PathBuf::from(path.trim()));
            }
        }
        if let Some(workers) = parse_env::<usize>("MAX_WORKERS")? {
            if workers == 0 {
                return Err(ConfigError::Invalid {
                    key: "MAX_WORKERS",
                    value: "0".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            // Cap at CPU count so the worker memory budget holds
            settings.max_workers = workers.min(num_cpus::get().max(1));
        }
        if let Some(mb) = parse_env::<u64>("MAX_FILE_SIZE_MB")? {
            settings.max_file_size_mb = mb;
        }
        if let Some(kb) = parse_env::<u64>("MIN_FILE_KB")? {
            settings.min_file_kb = kb;
        }
        if let Some(days) = parse_env::<u32>("CACHE_TTL_DAYS")? {
            settings.cache_ttl_days = days;
        }
        if let Some(secs) = parse_env::<u64>("ANALYSIS_TIMEOUT_SEC")? {
            settings.analysis_timeout_secs = secs;
        }
        if let Some(secs) = parse_env::<u64>("GENERATION_TIMEOUT_SEC")? {
            settings.generation_timeout_secs = secs;
        }
        if let Some(debug) = parse_env::<bool>("DEBUG")? {
            settings.debug = debug;
        }
        if let Ok(cmd) = std::env::var("ANALYZER_CMD") {
            if !cmd.trim().is_empty() {
                settings.analyzer_cmd = cmd.trim().to_string();
            }
        }

        Ok(settings)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_root.join("cache")
    }

    pub fn presets_dir(&self) -> PathBuf {
        self.data_root.join("presets")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_root.join("exports")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
