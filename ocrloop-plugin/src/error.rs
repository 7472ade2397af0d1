//! Plugin lifecycle error types

use std::time::Duration;

use thiserror::Error;

/// Lifecycle result type
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Why a plugin instance never became, or stopped being, usable
///
/// Every variant except [`LifecycleError::Cancelled`] is final for the
/// instance it came from; recovering means building a new one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The subprocess could not be launched or connected to
    #[error("plugin {name} failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    /// The plugin answered the handshake incorrectly or not at all
    #[error("plugin {name} handshake failed: {reason}")]
    HandshakeFailed { name: String, reason: String },

    #[error("plugin {name} did not answer the handshake within {timeout:?}")]
    HandshakeTimeout { name: String, timeout: Duration },

    /// The dispensed plugin lacks interfaces the host requires
    #[error("plugin {name} does not serve {missing:?}")]
    TypeMismatch { name: String, missing: Vec<String> },

    #[error("plugin {name} could not be dispensed: {reason}")]
    DispenseFailed { name: String, reason: String },

    /// The base connection closed while the plugin was ready
    #[error("lost connection to plugin {name}")]
    ConnectionLost { name: String },

    #[error("plugin {name} is stopped")]
    Stopped { name: String },

    /// The caller gave up waiting
    #[error("waiting for plugin {name} was cancelled")]
    Cancelled { name: String },
}

impl LifecycleError {
    pub fn start_failed(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::StartFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn handshake_failed(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::HandshakeFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn dispense_failed(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::DispenseFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn stopped(name: impl Into<String>) -> Self {
        Self::Stopped { name: name.into() }
    }

    pub fn cancelled(name: impl Into<String>) -> Self {
        Self::Cancelled { name: name.into() }
    }

    /// Whether the plugin instance is unusable from now on
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LifecycleError::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_plugin() {
        let err = LifecycleError::start_failed("median", "No such file or directory");
        assert_eq!(err.to_string(), "plugin median failed to start: No such file or directory");

        let err = LifecycleError::TypeMismatch {
            name: "median".to_string(),
            missing: vec!["PluginMedian".to_string()],
        };
        assert!(err.to_string().contains("\"PluginMedian\""));
    }

    #[test]
    fn test_only_cancellation_is_recoverable() {
        assert!(!LifecycleError::cancelled("median").is_fatal());
        assert!(LifecycleError::stopped("median").is_fatal());
        assert!(LifecycleError::HandshakeTimeout {
            name: "median".to_string(),
            timeout: Duration::from_millis(10),
        }
        .is_fatal());
    }
}
