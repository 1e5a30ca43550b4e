//! Configuration for the logging system
//!
//! Loaded from the `[logging]` table of the main configuration file or from
//! a standalone TOML file, then adjusted with environment variables.

use super::features::LogFeature;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const VALID_LEVELS: [&str; 6] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR", "OFF"];

/// Main logging configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// General logging settings
    pub general: GeneralConfig,
    /// Feature-specific log levels, keyed by feature name
    pub features: HashMap<String, String>,
}

/// General logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log level for all modules
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            features: HashMap::new(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_level: "INFO".to_string(),
        }
    }
}

impl LogConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;

        let mut config: LogConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides:
    /// `MONGO_ACL_LOG_LEVEL` and `MONGO_ACL_LOG_FEATURE_<NAME>`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("MONGO_ACL_LOG_LEVEL") {
            self.general.default_level = level;
        }

        for (key, value) in std::env::vars() {
            if let Some(feature) = key.strip_prefix("MONGO_ACL_LOG_FEATURE_") {
                self.features.insert(feature.to_lowercase(), value);
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_level(&self.general.default_level)?;

        for (feature, level) in &self.features {
            if LogFeature::from_name(feature).is_none() {
                return Err(ConfigError::UnknownFeature(feature.clone()));
            }
            if parse_level(level).is_err() {
                return Err(ConfigError::InvalidFeatureLevel(feature.clone(), level.clone()));
            }
        }

        Ok(())
    }

    /// Feature targets with their configured level
    pub fn feature_filters(&self) -> Result<Vec<(&'static str, log::LevelFilter)>, ConfigError> {
        let mut filters = Vec::with_capacity(self.features.len());
        for (name, level) in &self.features {
            let feature =
                LogFeature::from_name(name).ok_or_else(|| ConfigError::UnknownFeature(name.clone()))?;
            filters.push((feature.target(), parse_level(level)?));
        }
        Ok(filters)
    }
}

/// Parses a level name, case-insensitively
pub fn parse_level(level: &str) -> Result<log::LevelFilter, ConfigError> {
    let upper = level.to_uppercase();
    if !VALID_LEVELS.contains(&upper.as_str()) {
        return Err(ConfigError::InvalidLevel(level.to_string()));
    }

    Ok(match upper.as_str() {
        "TRACE" => log::LevelFilter::Trace,
        "DEBUG" => log::LevelFilter::Debug,
        "INFO" => log::LevelFilter::Info,
        "WARN" => log::LevelFilter::Warn,
        "ERROR" => log::LevelFilter::Error,
        _ => log::LevelFilter::Off,
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
    #[error("Invalid log level for feature '{0}': {1}")]
    InvalidFeatureLevel(String, String),
    #[error("Unknown logging feature: {0}")]
    UnknownFeature(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.general.default_level, "INFO");
        assert!(config.features.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").unwrap(), log::LevelFilter::Debug);
        assert_eq!(parse_level("OFF").unwrap(), log::LevelFilter::Off);
        assert!(matches!(parse_level("LOUD"), Err(ConfigError::InvalidLevel(_))));
    }

    #[test]
    fn test_validate_features() {
        let mut config = LogConfig::default();
        config.features.insert("security".into(), "DEBUG".into());
        assert!(config.validate().is_ok());
        assert_eq!(
            config.feature_filters().unwrap(),
            vec![("mongo_acl::security", log::LevelFilter::Debug)]
        );

        config.features.insert("security".into(), "NOISY".into());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFeatureLevel(_, _))));

        config.features.clear();
        config.features.insert("network".into(), "INFO".into());
        assert!(matches!(config.validate(), Err(ConfigError::UnknownFeature(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[general]\ndefault_level = \"WARN\"\n\n[features]\nregistry = \"DEBUG\""
        )
        .unwrap();

        let config = LogConfig::from_file(file.path()).unwrap();
        assert_eq!(config.features.get("registry").map(String::as_str), Some("DEBUG"));
    }
}
