//! Per-domain validation

use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// A configuration domain that can check its own values
pub trait Validatable {
    fn validate(&self) -> ConfigResult<()>;

    /// Name used in [`ConfigError::Invalid`]
    fn domain_name(&self) -> &'static str;

    /// Require a count to be at least one
    fn require_nonzero(&self, field: &str, value: usize) -> ConfigResult<()> {
        if value == 0 {
            return Err(ConfigError::invalid(self.domain_name(), format!("{field} must be at least 1")));
        }
        Ok(())
    }

    /// Require a duration to be at least one millisecond, the unit it is stored in
    fn require_millis(&self, field: &str, value: Duration) -> ConfigResult<()> {
        if value.as_millis() == 0 {
            return Err(ConfigError::invalid(
                self.domain_name(),
                format!("{field} must be at least 1ms, got {value:?}"),
            ));
        }
        Ok(())
    }
}
