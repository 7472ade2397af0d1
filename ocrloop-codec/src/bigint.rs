//! Arbitrary-precision integers on the wire
//!
//! Two forms are used. [`WireBigInt`] is the message form: a sign flag and a
//! big-endian magnitude. Fixed-layout records use [`serialize_signed`], a
//! sign-extended two's complement word of a declared width.

use num_bigint::{BigInt, Sign};
use num_traits::Signed;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// Sign and magnitude of a big integer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireBigInt {
    #[serde(default)]
    pub negative: bool,
    #[serde(with = "crate::bytes")]
    pub value: Vec<u8>,
}

impl WireBigInt {
    pub fn to_bigint(&self) -> BigInt {
        let sign = if self.negative { Sign::Minus } else { Sign::Plus };
        BigInt::from_bytes_be(sign, &self.value)
    }
}

impl From<&BigInt> for WireBigInt {
    fn from(value: &BigInt) -> Self {
        let (sign, magnitude) = value.to_bytes_be();
        Self {
            negative: sign == Sign::Minus,
            value: magnitude,
        }
    }
}

impl From<WireBigInt> for BigInt {
    fn from(wire: WireBigInt) -> Self {
        wire.to_bigint()
    }
}

/// Serialize a `BigInt` field in its [`WireBigInt`] form
pub fn serialize<S>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    WireBigInt::from(value).serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<BigInt, D::Error>
where
    D: Deserializer<'de>,
{
    WireBigInt::deserialize(deserializer).map(BigInt::from)
}

/// Encode `value` as a `width`-byte big-endian two's complement word
pub fn serialize_signed(width: usize, value: &BigInt) -> Result<Vec<u8>, ValidationError> {
    let bytes = value.to_signed_bytes_be();
    if bytes.len() > width {
        return Err(ValidationError::WordOverflow {
            width,
            value: value.clone(),
        });
    }

    let fill = if value.is_negative() { 0xff } else { 0x00 };
    let mut word = vec![fill; width - bytes.len()];
    word.extend_from_slice(&bytes);
    Ok(word)
}

/// Decode a `width`-byte big-endian two's complement word
pub fn deserialize_signed(width: usize, bytes: &[u8]) -> Result<BigInt, ValidationError> {
    if bytes.len() != width {
        return Err(ValidationError::encoded_length("signed word", width, bytes.len()));
    }
    Ok(BigInt::from_signed_bytes_be(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wire_form_of_negative_value() {
        let wire = WireBigInt::from(&BigInt::from(-258));
        assert!(wire.negative);
        assert_eq!(wire.value, vec![0x01, 0x02]);
        assert_eq!(wire.to_bigint(), BigInt::from(-258));
    }

    #[test]
    fn test_empty_magnitude_is_zero() {
        let wire = WireBigInt {
            negative: true,
            value: vec![],
        };
        assert_eq!(wire.to_bigint(), BigInt::from(0));
    }

    #[test]
    fn test_signed_word_sign_extension() {
        assert_eq!(serialize_signed(4, &BigInt::from(-1)).unwrap(), vec![0xff; 4]);
        assert_eq!(serialize_signed(4, &BigInt::from(1)).unwrap(), vec![0, 0, 0, 1]);
        assert_eq!(serialize_signed(2, &BigInt::from(-129)).unwrap(), vec![0xff, 0x7f]);
    }

    #[test]
    fn test_signed_word_overflow() {
        // 128 needs a leading zero byte to stay positive
        let err = serialize_signed(1, &BigInt::from(128)).unwrap_err();
        assert!(matches!(err, ValidationError::WordOverflow { width: 1, .. }));
        assert!(serialize_signed(1, &BigInt::from(-128)).is_ok());
    }

    #[test]
    fn test_signed_word_wrong_length() {
        let err = deserialize_signed(32, &[0u8; 31]).unwrap_err();
        assert_eq!(err, ValidationError::encoded_length("signed word", 32, 31));
    }

    proptest! {
        #[test]
        fn prop_wire_bigint_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..48)) {
            let value = BigInt::from_signed_bytes_be(&bytes);
            prop_assert_eq!(WireBigInt::from(&value).to_bigint(), value);
        }

        #[test]
        fn prop_signed_word_round_trip(word in proptest::array::uniform32(any::<u8>())) {
            let value = BigInt::from_signed_bytes_be(&word);
            let encoded = serialize_signed(32, &value).unwrap();
            prop_assert_eq!(encoded.len(), 32);
            prop_assert_eq!(deserialize_signed(32, &encoded).unwrap(), value);
        }
    }
}
