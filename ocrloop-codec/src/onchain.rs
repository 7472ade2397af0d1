//! Versioned fixed-layout on-chain configuration
//!
//! Layout, 96 bytes: version word, `min` word, `max` word. Each word is a
//! 32-byte big-endian two's complement integer.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::bigint::{deserialize_signed, serialize_signed};
use crate::error::ValidationError;

pub const ONCHAIN_CONFIG_VERSION: u8 = 1;

const WORD_BYTES: usize = 32;

pub const ONCHAIN_CONFIG_LENGTH: usize = 3 * WORD_BYTES;

/// Bounds an aggregated median must fall within
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainConfig {
    #[serde(with = "crate::bigint")]
    pub min: BigInt,
    #[serde(with = "crate::bigint")]
    pub max: BigInt,
}

impl OnchainConfig {
    pub fn new(min: impl Into<BigInt>, max: impl Into<BigInt>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Check `min <= max`
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min > self.max {
            return Err(ValidationError::MinGreaterThanMax {
                min: self.min.clone(),
                max: self.max.clone(),
            });
        }
        Ok(())
    }
}

/// Codec for the standard 96-byte layout
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardOnchainConfigCodec;

impl StandardOnchainConfigCodec {
    /// Encode a config. Ordering of `min` and `max` is not checked here;
    /// call [`OnchainConfig::validate`] first when that matters.
    pub fn encode(&self, config: &OnchainConfig) -> Result<Vec<u8>, ValidationError> {
        let mut encoded = Vec::with_capacity(ONCHAIN_CONFIG_LENGTH);
        encoded.extend(serialize_signed(WORD_BYTES, &BigInt::from(ONCHAIN_CONFIG_VERSION))?);
        encoded.extend(serialize_signed(WORD_BYTES, &config.min)?);
        encoded.extend(serialize_signed(WORD_BYTES, &config.max)?);
        Ok(encoded)
    }

    pub fn decode(&self, encoded: &[u8]) -> Result<OnchainConfig, ValidationError> {
        if encoded.len() != ONCHAIN_CONFIG_LENGTH {
            return Err(ValidationError::encoded_length(
                "on-chain config",
                ONCHAIN_CONFIG_LENGTH,
                encoded.len(),
            ));
        }

        let version = deserialize_signed(WORD_BYTES, &encoded[..WORD_BYTES])?;
        if version != BigInt::from(ONCHAIN_CONFIG_VERSION) {
            return Err(ValidationError::Version {
                expected: ONCHAIN_CONFIG_VERSION,
                actual: version,
            });
        }

        let config = OnchainConfig {
            min: deserialize_signed(WORD_BYTES, &encoded[WORD_BYTES..2 * WORD_BYTES])?,
            max: deserialize_signed(WORD_BYTES, &encoded[2 * WORD_BYTES..])?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn word(value: i64) -> Vec<u8> {
        serialize_signed(WORD_BYTES, &BigInt::from(value)).unwrap()
    }

    #[test]
    fn test_round_trip_example() {
        let codec = StandardOnchainConfigCodec;
        let config = OnchainConfig::new(100, 200);

        let encoded = codec.encode(&config).unwrap();
        assert_eq!(encoded.len(), ONCHAIN_CONFIG_LENGTH);
        assert_eq!(encoded[31], ONCHAIN_CONFIG_VERSION);
        assert_eq!(codec.decode(&encoded).unwrap(), config);
    }

    #[test]
    fn test_encode_does_not_check_ordering() {
        let codec = StandardOnchainConfigCodec;
        let config = OnchainConfig::new(300, 100);

        let encoded = codec.encode(&config).unwrap();
        assert_eq!(encoded.len(), ONCHAIN_CONFIG_LENGTH);
        assert!(config.validate().is_err());
        assert_eq!(
            codec.decode(&encoded).unwrap_err(),
            ValidationError::MinGreaterThanMax {
                min: BigInt::from(300),
                max: BigInt::from(100),
            }
        );
    }

    #[test]
    fn test_decode_rejects_hand_crafted_min_above_max() {
        let mut encoded = word(1);
        encoded.extend(word(300));
        encoded.extend(word(100));

        let err = StandardOnchainConfigCodec.decode(&encoded).unwrap_err();
        assert!(matches!(err, ValidationError::MinGreaterThanMax { .. }));
    }

    #[test]
    fn test_decode_rejects_wrong_version() {
        let mut encoded = word(2);
        encoded.extend(word(1));
        encoded.extend(word(2));

        let err = StandardOnchainConfigCodec.decode(&encoded).unwrap_err();
        assert_eq!(
            err,
            ValidationError::Version {
                expected: 1,
                actual: BigInt::from(2),
            }
        );
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        for len in [0, 95, 97, 128] {
            let err = StandardOnchainConfigCodec.decode(&vec![0u8; len]).unwrap_err();
            assert!(matches!(err, ValidationError::EncodedLength { expected: 96, actual, .. } if actual == len));
        }
    }

    #[test]
    fn test_encode_rejects_value_wider_than_a_word() {
        let huge = BigInt::from(1) << 256u32;
        let err = StandardOnchainConfigCodec
            .encode(&OnchainConfig::new(0, huge))
            .unwrap_err();
        assert!(matches!(err, ValidationError::WordOverflow { width: 32, .. }));
    }

    #[test]
    fn test_negative_bounds_round_trip() {
        let config = OnchainConfig::new(-5_000_000_000i64, -1);
        let encoded = StandardOnchainConfigCodec.encode(&config).unwrap();
        assert_eq!(StandardOnchainConfigCodec.decode(&encoded).unwrap(), config);
    }

    proptest! {
        #[test]
        fn prop_ordered_configs_round_trip(
            a in proptest::array::uniform32(any::<u8>()),
            b in proptest::array::uniform32(any::<u8>()),
        ) {
            let a = BigInt::from_signed_bytes_be(&a);
            let b = BigInt::from_signed_bytes_be(&b);
            let config = if a <= b { OnchainConfig { min: a, max: b } } else { OnchainConfig { min: b, max: a } };

            let encoded = StandardOnchainConfigCodec.encode(&config).unwrap();
            prop_assert_eq!(encoded.len(), ONCHAIN_CONFIG_LENGTH);
            prop_assert_eq!(StandardOnchainConfigCodec.decode(&encoded).unwrap(), config);
        }

        #[test]
        fn prop_non_version_one_is_rejected(version in any::<i64>().prop_filter("not one", |v| *v != 1)) {
            let mut encoded = word(version);
            encoded.extend(word(0));
            encoded.extend(word(0));
            let is_version_error = matches!(
                StandardOnchainConfigCodec.decode(&encoded),
                Err(ValidationError::Version { .. })
            );
            prop_assert!(is_version_error);
        }
    }
}
