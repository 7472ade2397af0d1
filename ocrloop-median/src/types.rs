//! Median reporting domain types and their wire forms
//!
//! Domain types use the narrow native widths (`u8` observers and rounds,
//! [`ConfigDigest`]). Wire forms carry wider integers and raw bytes so that
//! out-of-range values are caught by an explicit check on the receiving
//! side instead of failing deserialization.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use ocrloop_codec::{checked_u8, ConfigDigest, ValidationError};
use serde::{Deserialize, Serialize};

/// Index of an oracle in the current configuration
pub type OracleId = u8;

/// Sub-service name to its last error, if any
pub type HealthReport = BTreeMap<String, Option<String>>;

/// One oracle's parsed observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAttributedObservation {
    pub timestamp: u32,
    pub value: BigInt,
    pub juels_per_fee_coin: BigInt,
    pub observer: OracleId,
}

/// Position of a report in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportTimestamp {
    pub config_digest: ConfigDigest,
    pub epoch: u32,
    pub round: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportContext {
    pub report_timestamp: ReportTimestamp,
    pub extra_hash: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedOnchainSignature {
    #[serde(with = "ocrloop_codec::bytes")]
    pub signature: Vec<u8>,
    pub signer: OracleId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedObservation {
    #[serde(with = "ocrloop_codec::bytes")]
    pub observation: Vec<u8>,
    pub observer: OracleId,
}

/// Latest transmission recorded by the median contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmissionDetails {
    pub config_digest: ConfigDigest,
    pub epoch: u32,
    pub round: u8,
    pub latest_answer: BigInt,
    pub latest_timestamp: DateTime<Utc>,
}

/// Latest round a new report was requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRequested {
    pub config_digest: ConfigDigest,
    pub epoch: u32,
    pub round: u8,
}

/// Parameters a reporting plugin instance is created with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPluginConfig {
    pub config_digest: ConfigDigest,
    pub oracle_id: OracleId,
    pub n: u32,
    pub f: u32,
    #[serde(with = "ocrloop_codec::bytes")]
    pub onchain_config: Vec<u8>,
    #[serde(with = "ocrloop_codec::bytes")]
    pub offchain_config: Vec<u8>,
    #[serde(with = "millis")]
    pub estimated_round_interval: Duration,
    #[serde(with = "millis")]
    pub max_duration_query: Duration,
    #[serde(with = "millis")]
    pub max_duration_observation: Duration,
    #[serde(with = "millis")]
    pub max_duration_report: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportingPluginLimits {
    pub max_query_length: u64,
    pub max_observation_length: u64,
    pub max_report_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPluginInfo {
    pub name: String,
    pub unique_reports: bool,
    pub limits: ReportingPluginLimits,
}

/// Wire form of [`ReportTimestamp`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireReportTimestamp {
    #[serde(with = "ocrloop_codec::bytes")]
    pub config_digest: Vec<u8>,
    pub epoch: u32,
    pub round: u32,
}

impl From<&ReportTimestamp> for WireReportTimestamp {
    fn from(ts: &ReportTimestamp) -> Self {
        Self {
            config_digest: ts.config_digest.as_bytes().to_vec(),
            epoch: ts.epoch,
            round: ts.round.into(),
        }
    }
}

impl TryFrom<WireReportTimestamp> for ReportTimestamp {
    type Error = ValidationError;

    fn try_from(wire: WireReportTimestamp) -> Result<Self, Self::Error> {
        Ok(Self {
            config_digest: ConfigDigest::try_from(wire.config_digest.as_slice())?,
            epoch: wire.epoch,
            round: checked_u8("round", wire.round)?,
        })
    }
}

/// Wire form of [`ReportContext`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireReportContext {
    pub report_timestamp: WireReportTimestamp,
    #[serde(with = "ocrloop_codec::bytes")]
    pub extra_hash: Vec<u8>,
}

impl From<&ReportContext> for WireReportContext {
    fn from(ctx: &ReportContext) -> Self {
        Self {
            report_timestamp: (&ctx.report_timestamp).into(),
            extra_hash: ctx.extra_hash.to_vec(),
        }
    }
}

impl TryFrom<WireReportContext> for ReportContext {
    type Error = ValidationError;

    fn try_from(wire: WireReportContext) -> Result<Self, Self::Error> {
        let actual = wire.extra_hash.len();
        let extra_hash = <[u8; 32]>::try_from(wire.extra_hash)
            .map_err(|_| ValidationError::encoded_length("extra hash", 32, actual))?;
        Ok(Self {
            report_timestamp: wire.report_timestamp.try_into()?,
            extra_hash,
        })
    }
}

/// Wire form of [`ParsedAttributedObservation`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireObservation {
    pub timestamp: u32,
    #[serde(with = "ocrloop_codec::bigint")]
    pub value: BigInt,
    #[serde(with = "ocrloop_codec::bigint")]
    pub juels_per_fee_coin: BigInt,
    pub observer: u32,
}

impl From<&ParsedAttributedObservation> for WireObservation {
    fn from(obs: &ParsedAttributedObservation) -> Self {
        Self {
            timestamp: obs.timestamp,
            value: obs.value.clone(),
            juels_per_fee_coin: obs.juels_per_fee_coin.clone(),
            observer: obs.observer.into(),
        }
    }
}

impl TryFrom<WireObservation> for ParsedAttributedObservation {
    type Error = ValidationError;

    fn try_from(wire: WireObservation) -> Result<Self, Self::Error> {
        Ok(Self {
            timestamp: wire.timestamp,
            value: wire.value,
            juels_per_fee_coin: wire.juels_per_fee_coin,
            observer: checked_u8("observer", wire.observer)?,
        })
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
