//! Configuration errors

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An override variable is set but cannot be parsed
    #[error("invalid value {value:?} for {var}: {reason}")]
    Env {
        var: String,
        value: String,
        reason: String,
    },

    /// A loaded value is outside what its domain accepts
    #[error("invalid {domain} config: {message}")]
    Invalid { domain: &'static str, message: String },
}

impl ConfigError {
    pub fn env(var: impl Into<String>, value: impl Into<String>, reason: impl ToString) -> Self {
        Self::Env {
            var: var.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid(domain: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            domain,
            message: message.into(),
        }
    }
}
