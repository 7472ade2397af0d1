//! Plugin subprocess lifecycle configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::error::ConfigResult;
use crate::validation::Validatable;

/// Plugin lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginConfig {
    /// How long to wait for the plugin to answer the first ping
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,

    /// How long to wait for a dispense reply
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_dispense_timeout")]
    pub dispense_timeout: Duration,

    /// How long a stopped plugin may take to exit before it is killed
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_stop_grace_period")]
    pub stop_grace_period: Duration,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: default_handshake_timeout(),
            dispense_timeout: default_dispense_timeout(),
            stop_grace_period: default_stop_grace_period(),
        }
    }
}

impl Validatable for PluginConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.require_millis("handshake_timeout", self.handshake_timeout)?;
        self.require_millis("dispense_timeout", self.dispense_timeout)?;
        self.require_millis("stop_grace_period", self.stop_grace_period)
    }

    fn domain_name(&self) -> &'static str {
        "plugin"
    }
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_dispense_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_stop_grace_period() -> Duration {
    Duration::from_millis(500)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_config_defaults() {
        let config = PluginConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.stop_grace_period, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_plugin_config_durations_in_millis() {
        let yaml = "handshake_timeout: 250\nstop_grace_period: 100\n";
        let config: PluginConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.handshake_timeout, Duration::from_millis(250));
        assert_eq!(config.stop_grace_period, Duration::from_millis(100));
        assert_eq!(config.dispense_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_plugin_config_rejects_zero_timeout() {
        let config = PluginConfig {
            handshake_timeout: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("handshake_timeout"));
    }
}
