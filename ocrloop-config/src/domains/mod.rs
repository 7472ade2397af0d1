//! Domain-specific configuration modules

pub mod broker;
pub mod logging;
pub mod plugin;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Top-level configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    /// Broker and base connection configuration
    #[serde(default)]
    pub broker: broker::BrokerConfig,

    /// Plugin subprocess lifecycle configuration
    #[serde(default)]
    pub plugin: plugin::PluginConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl LoopConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.broker.validate()?;
        self.plugin.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = LoopConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(LoopConfig::default().validate_all().is_ok());
    }

    #[test]
    fn test_sample_round_trips() {
        let sample = LoopConfig::generate_sample();
        let parsed: LoopConfig = serde_yaml::from_str(&sample).unwrap();
        assert_eq!(parsed, LoopConfig::default());
    }
}
