//! TOML-based operator configuration.
//!
//! Stores the knobs the admin tooling reads on every run:
//! - Reading completion threshold
//! - Bulk fan-out concurrency
//! - Operator name stamped into repair metadata
//!
//! Configuration is stored at `<data_dir>/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use crate::error::ConfigError;

/// Reading-session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingConfig {
    /// Minutes a session must last to count as completed.
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold_min: u32,
}

/// Bulk-operation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Worker-pool size for fan-out over independent records.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// Operator identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Name written to `repaired_by` when repairs are applied.
    #[serde(default = "default_operator")]
    pub name: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reading: ReadingConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub operator: OperatorConfig,
}

// Default functions
fn default_completion_threshold() -> u32 {
    20
}
fn default_concurrency() -> usize {
    8
}
fn default_operator() -> String {
    "admin".to_string()
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            completion_threshold_min: default_completion_threshold(),
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            name: default_operator(),
        }
    }
}

impl Config {
    fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("<data_dir>"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load the configuration, falling back to defaults when the file
    /// does not exist yet.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::LoadFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::LoadFailed {
            path,
            message: e.to_string(),
        })
    }

    /// Persist the configuration.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let raw = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, raw).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.reading.completion_threshold_min, 20);
        assert_eq!(config.bulk.concurrency, 8);
        assert_eq!(config.operator.name, "admin");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str("[operator]\nname = \"ms-ortiz\"\n").unwrap();
        assert_eq!(config.operator.name, "ms-ortiz");
        assert_eq!(config.reading.completion_threshold_min, 20);
    }

    #[test]
    fn roundtrips_through_toml() {
        let mut config = Config::default();
        config.reading.completion_threshold_min = 15;
        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.reading.completion_threshold_min, 15);
    }
}
