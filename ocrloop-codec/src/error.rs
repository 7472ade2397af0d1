//! Validation errors raised while converting wire values

use num_bigint::BigInt;
use thiserror::Error;

/// A decoded or encoded value violated a wire invariant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{what} must be {expected} bytes, got {actual}")]
    EncodedLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("config digest must be 32 bytes, got {actual}")]
    DigestLength { actual: usize },

    #[error("{field} {actual} is out of range (max {max})")]
    OutOfRange {
        field: &'static str,
        max: u64,
        actual: u64,
    },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: i64 },

    #[error("unexpected on-chain config version {actual}, expected {expected}")]
    Version { expected: u8, actual: BigInt },

    #[error("min ({min}) is greater than max ({max})")]
    MinGreaterThanMax { min: BigInt, max: BigInt },

    #[error("{value} does not fit in a {width}-byte signed word")]
    WordOverflow { width: usize, value: BigInt },
}

impl ValidationError {
    pub fn out_of_range(field: &'static str, max: u64, actual: u64) -> Self {
        Self::OutOfRange { field, max, actual }
    }

    pub fn encoded_length(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::EncodedLength {
            what,
            expected,
            actual,
        }
    }
}
