//! Broker and base connection configuration

use serde::{Deserialize, Serialize};
use crate::error::ConfigResult;
use crate::validation::Validatable;

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Capacity of the outbound frame queue feeding the writer task
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Largest frame (in bytes, one JSON line) accepted from the counterpart
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Validatable for BrokerConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.require_nonzero("outbound_buffer", self.outbound_buffer)?;
        self.require_nonzero("max_frame_bytes", self.max_frame_bytes)
    }

    fn domain_name(&self) -> &'static str {
        "broker"
    }
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_max_frame_bytes() -> usize {
    4 * 1024 * 1024 // 4MB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.outbound_buffer, 64);
        assert_eq!(config.max_frame_bytes, 4 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broker_config_rejects_zero_buffer() {
        let config = BrokerConfig {
            outbound_buffer: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
