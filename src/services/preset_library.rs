//! Preset resolution
//!
//! Built-in presets plus custom ones loaded from `<data_root>/presets/`
//! (one JSON file per preset). A custom preset with a built-in's name
//! shadows it.

use crate::models::{builtin_presets, Preset};
use std::path::{Path, PathBuf};

pub struct PresetLibrary {
    presets_dir: PathBuf,
}

impl PresetLibrary {
    pub fn new(presets_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(presets_dir)?;
        Ok(Self {
            presets_dir: presets_dir.to_path_buf(),
        })
    }

    /// All available presets, customs shadowing builtins by name
    pub fn list(&self) -> Vec<Preset> {
        let mut presets = builtin_presets();
        for custom in self.load_custom() {
            match presets.iter_mut().find(|p| p.name == custom.name) {
                Some(slot) => *slot = custom,
                None => presets.push(custom),
            }
        }
        presets
    }

    pub fn get(&self, name: &str) -> Option<Preset> {
        self.list().into_iter().find(|p| p.name == name)
    }

    fn load_custom(&self) -> Vec<Preset> {
        let Ok(dir) = std::fs::read_dir(&self.presets_dir) else {
            return Vec::new();
        };
        let mut presets = Vec::new();
        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let preset = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<Preset>(&raw).map_err(|e| e.to_string()))
                .and_then(|preset| preset.validate().map(|()| preset));
            match preset {
                Ok(preset) => presets.push(preset),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping invalid preset file");
                }
            }
        }
        // deterministic order regardless of directory iteration
        presets.sort_by(|a, b| a.name.cmp(&b.name));
        presets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtins_always_present() {
        let dir = TempDir::new().unwrap();
        let library = PresetLibrary::new(dir.path()).unwrap();
        let presets = library.list();
        assert!(presets.iter().any(|p| p.name == "Harmonic Flow"));
        assert!(presets.iter().any(|p| p.name == "Peak Time"));
    }

    #[test]
    fn test_custom_preset_loaded_and_shadows() {
        let dir = TempDir::new().unwrap();
        let mut custom = builtin_presets().remove(0); // "Harmonic Flow"
        custom.max_bpm_jump = 2.0;
        std::fs::write(
            dir.path().join("harmonic_flow.json"),
            serde_json::to_string_pretty(&custom).unwrap(),
        )
        .unwrap();

        let library = PresetLibrary::new(dir.path()).unwrap();
        let loaded = library.get("Harmonic Flow").unwrap();
        assert_eq!(loaded.max_bpm_jump, 2.0);
        // shadowed, not duplicated
        let count = library
            .list()
            .iter()
            .filter(|p| p.name == "Harmonic Flow")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_invalid_preset_file_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(
            dir.path().join("bad_range.json"),
            r#"{"name":"Bad","bpm_range":[200.0,100.0]}"#,
        )
        .unwrap();

        let library = PresetLibrary::new(dir.path()).unwrap();
        assert!(library.get("Bad").is_none());
        assert_eq!(library.list().len(), builtin_presets().len());
    }

    #[test]
    fn test_unknown_preset_is_none() {
        let dir = TempDir::new().unwrap();
        let library = PresetLibrary::new(dir.path()).unwrap();
        assert!(library.get("No Such Preset").is_none());
    }
}
