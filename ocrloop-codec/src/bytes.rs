//! Serde helpers carrying byte strings as standard base64

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&STANDARD.encode(bytes))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
}

/// Same encoding for lists of byte strings
pub mod list {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(&STANDARD.encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Report {
        #[serde(with = "crate::bytes")]
        report: Vec<u8>,
        #[serde(with = "crate::bytes::list")]
        signatures: Vec<Vec<u8>>,
    }

    #[test]
    fn test_bytes_are_base64_strings() {
        let value = Report {
            report: vec![0xde, 0xad, 0xbe, 0xef],
            signatures: vec![vec![1], vec![]],
        };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["report"], "3q2+7w==");
        assert_eq!(json["signatures"][1], "");

        let back: Report = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let json = serde_json::json!({"report": "not base64!", "signatures": []});
        assert!(serde_json::from_value::<Report>(json).is_err());
    }
}
