//! Host configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via TICKFSM_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tickfsm_core::EngineConfig;
use tickfsm_storage::{MachineStore, StorageError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults for machines that do not carry their own engine settings.
    pub engine: EngineConfig,
    /// Where saved machines live.
    pub storage: StorageConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("TICKFSM_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.engine.apply_env_overrides();
        self.storage.apply_env_overrides();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.tick_rate_ms == 0 {
            return Err(ConfigError::Validation(
                "engine.tick_rate_ms must be positive".to_string(),
            ));
        }
        if self.engine.max_cycles == Some(0) {
            return Err(ConfigError::Validation(
                "engine.max_cycles must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Opens the machine store under the configured data directory.
    pub fn open_store(&self) -> Result<MachineStore, StorageError> {
        MachineStore::open(self.storage.machines_dir())
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TICKFSM_DATA") {
            self.data_dir = PathBuf::from(dir);
        }
    }

    /// Returns the saved machines directory path.
    pub fn machines_dir(&self) -> PathBuf {
        self.data_dir.join("machines")
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.tick_rate_ms, 1000);
        assert!(config.engine.max_cycles.is_none());
        assert_eq!(
            config.storage.machines_dir(),
            PathBuf::from("./data/machines")
        );
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tickfsm.yaml");

        let mut config = Config::default();
        config.engine.max_cycles = Some(64);
        config.storage.data_dir = dir.path().join("data");
        config.save(&path).unwrap();

        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tickfsm.yaml");
        std::fs::write(&path, "engine:\n  tick_rate_ms: 50\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.engine.tick_rate_ms, 50);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tickfsm.yaml");
        std::fs::write(&path, "engine:\n  tick_rate_ms: 0\n").unwrap();

        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/nonexistent/tickfsm.yaml");
        assert!(matches!(result, Err(ConfigError::Io(..))));
    }

    #[test]
    fn test_open_store() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();

        let store = config.open_store().unwrap();
        assert!(store.is_empty());
        assert!(dir.path().join("machines").is_dir());
    }
}
