//! # Logging
//!
//! The crate logs through the `log` facade under one target per feature
//! (see [`features::LogFeature`]). [`LoggingSystem::init`] installs
//! `env_logger` with the configured default level and feature overrides;
//! embedding applications that install their own logger simply skip it.

pub mod config;
pub mod features;

pub use config::{ConfigError, GeneralConfig, LogConfig};
pub use features::LogFeature;

use once_cell::sync::OnceCell;

/// Configuration the logging system was initialized with
static LOGGING_CONFIG: OnceCell<LogConfig> = OnceCell::new();

/// Process-wide logger setup
pub struct LoggingSystem;

impl LoggingSystem {
    /// Initialize the logging system with the default configuration
    pub fn init_default() -> Result<(), LoggingError> {
        Self::init(&LogConfig::default())
    }

    /// Initialize the logging system. `RUST_LOG`, when set, is applied on
    /// top of the configured levels.
    pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
        config.validate()?;

        if LOGGING_CONFIG.get().is_some() {
            return Err(LoggingError::AlreadyInitialized);
        }

        let mut builder = env_logger::Builder::new();
        builder.filter_level(config::parse_level(&config.general.default_level)?);
        for (target, level) in config.feature_filters()? {
            builder.filter_module(target, level);
        }
        if let Ok(filters) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filters);
        }

        builder
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        LOGGING_CONFIG
            .set(config.clone())
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        log::info!(
            "logging initialized at {} with {} feature overrides",
            config.general.default_level,
            config.features.len()
        );
        Ok(())
    }

    /// Get the configuration the logging system was initialized with
    pub fn get_config() -> Option<&'static LogConfig> {
        LOGGING_CONFIG.get()
    }
}

/// Logging system errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logging system already initialized")]
    AlreadyInitialized,
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = LogConfig::default();
        config.general.default_level = "CHATTY".into();
        assert!(matches!(
            LoggingSystem::init(&config),
            Err(LoggingError::ConfigError(ConfigError::InvalidLevel(_)))
        ));
    }

    #[test]
    fn test_second_init_fails() {
        // the first call may lose against another test's logger
        let _ = LoggingSystem::init_default();
        assert!(matches!(
            LoggingSystem::init_default(),
            Err(LoggingError::AlreadyInitialized)
        ));
    }
}
