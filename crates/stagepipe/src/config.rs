//! Settings loaded from a JSON file, with sensible defaults for every field
//! so a missing file is never fatal.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stagepipe")
        .join("stages")
}

fn default_database_path() -> PathBuf {
    crate::db::default_database_path().unwrap_or_else(|| PathBuf::from("stagepipe.db"))
}

fn default_generation_timeout_secs() -> u64 {
    120
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_stuck_entry_max_age_minutes() -> u64 {
    60
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Root directory holding the five stage directories.
    pub data_dir: PathBuf,
    /// SQLite database file path.
    pub database_path: PathBuf,
    /// Upper bound on one candidate-generation model call.
    pub generation_timeout_secs: u64,
    /// Default confidence floor for generated mapping candidates.
    pub min_confidence: f64,
    /// PROCESSING entries older than this are considered stuck.
    pub stuck_entry_max_age_minutes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_path: default_database_path(),
            generation_timeout_secs: default_generation_timeout_secs(),
            min_confidence: default_min_confidence(),
            stuck_entry_max_age_minutes: default_stuck_entry_max_age_minutes(),
        }
    }
}

impl Settings {
    /// Loads settings from a JSON file. A missing file yields the defaults;
    /// a present but malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings: Settings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// The conventional settings location, `~/.stagepipe/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".stagepipe").join("settings.json"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Validation {
                message: format!(
                    "minConfidence must be between 0.0 and 1.0, got {}",
                    self.min_confidence
                ),
            });
        }
        if self.generation_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                message: "generationTimeoutSecs must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.generation_timeout_secs, 120);
        assert_eq!(settings.min_confidence, 0.5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.min_confidence, 0.5);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"minConfidence": 0.8}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.min_confidence, 0.8);
        assert_eq!(settings.generation_timeout_secs, 120);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"minConfidence": 1.5}"#).unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::Validation { .. })
        ));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::ParseJson(_))
        ));
    }
}
