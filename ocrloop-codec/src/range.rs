//! Narrowing conversions for small wire integers

use crate::error::ValidationError;

/// Narrow a wire value to 8 bits, failing instead of truncating
pub fn checked_u8(field: &'static str, value: u32) -> Result<u8, ValidationError> {
    u8::try_from(value).map_err(|_| ValidationError::out_of_range(field, u8::MAX.into(), value.into()))
}
