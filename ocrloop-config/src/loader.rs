//! Configuration loading and environment variable handling

use crate::domains::logging::{LogFormat, LogLevel};
use crate::domains::LoopConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "OCRLOOP".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<LoopConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: LoopConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<LoopConfig> {
        let mut config = LoopConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<LoopConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply `{prefix}_*` overrides on top of `config`
    fn apply_env_overrides(&self, config: &mut LoopConfig) -> ConfigResult<()> {
        if let Some(level) = self.parsed_var("LOG_LEVEL", |v| v.parse::<LogLevel>())? {
            config.logging.level = level;
        }
        if let Some(format) = self.parsed_var("LOG_FORMAT", |v| v.parse::<LogFormat>())? {
            config.logging.format = format;
        }
        if let Some(timeout) = self.millis_var("HANDSHAKE_TIMEOUT_MS")? {
            config.plugin.handshake_timeout = timeout;
        }
        if let Some(timeout) = self.millis_var("DISPENSE_TIMEOUT_MS")? {
            config.plugin.dispense_timeout = timeout;
        }
        if let Some(grace) = self.millis_var("STOP_GRACE_PERIOD_MS")? {
            config.plugin.stop_grace_period = grace;
        }
        if let Some(buffer) = self.parsed_var("OUTBOUND_BUFFER", |v| v.parse::<usize>())? {
            config.broker.outbound_buffer = buffer;
        }
        if let Some(max) = self.parsed_var("MAX_FRAME_BYTES", |v| v.parse::<usize>())? {
            config.broker.max_frame_bytes = max;
        }
        Ok(())
    }

    fn millis_var(&self, name: &str) -> ConfigResult<Option<Duration>> {
        self.parsed_var(name, |v| v.parse::<u64>().map(Duration::from_millis))
    }

    fn parsed_var<T, E, F>(&self, name: &str, parse: F) -> ConfigResult<Option<T>>
    where
        F: FnOnce(&str) -> Result<T, E>,
        E: ToString,
    {
        let var = format!("{}_{}", self.prefix, name);
        match std::env::var(&var) {
            Ok(value) => parse(&value).map(Some).map_err(|e| ConfigError::env(var, value, e)),
            Err(_) => Ok(None),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
