//! Fixed 32-byte configuration digest

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

pub const CONFIG_DIGEST_LENGTH: usize = 32;

/// Identity of a reporting configuration
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConfigDigest([u8; CONFIG_DIGEST_LENGTH]);

impl ConfigDigest {
    pub const fn new(bytes: [u8; CONFIG_DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONFIG_DIGEST_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; CONFIG_DIGEST_LENGTH]> for ConfigDigest {
    fn from(bytes: [u8; CONFIG_DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for ConfigDigest {
    type Error = ValidationError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; CONFIG_DIGEST_LENGTH]>::try_from(bytes)
            .map(Self)
            .map_err(|_| ValidationError::DigestLength { actual: bytes.len() })
    }
}

impl fmt::Display for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigDigest({})", self.to_hex())
    }
}

impl Serialize for ConfigDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ConfigDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        ConfigDigest::try_from(bytes.as_slice()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_length_is_enforced() {
        assert!(ConfigDigest::try_from([7u8; 32].as_slice()).is_ok());
        assert_eq!(
            ConfigDigest::try_from([7u8; 31].as_slice()).unwrap_err(),
            ValidationError::DigestLength { actual: 31 }
        );
        assert_eq!(
            ConfigDigest::try_from([7u8; 33].as_slice()).unwrap_err(),
            ValidationError::DigestLength { actual: 33 }
        );
    }

    #[test]
    fn test_digest_displays_as_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        assert!(ConfigDigest::from(bytes).to_string().starts_with("ab00"));
    }

    #[test]
    fn test_short_digest_fails_deserialization() {
        let json = serde_json::Value::String(STANDARD.encode([1u8; 31]));
        let err = serde_json::from_value::<ConfigDigest>(json).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }
}
