//! Client and server for `MedianContract`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use ocrloop_broker::{decode_request, encode_response, unknown_method, ClientConn, Fault, ServiceHandler};
use ocrloop_codec::{checked_u8, ConfigDigest, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{MedianError, MedianResult};
use crate::traits::MedianContract;
use crate::types::{RoundRequested, TransmissionDetails};

pub const INTERFACE: &str = "MedianContract";

const LATEST_TRANSMISSION_DETAILS: &str = "MedianContract/LatestTransmissionDetails";
const LATEST_ROUND_REQUESTED: &str = "MedianContract/LatestRoundRequested";

/// Wire form of [`TransmissionDetails`]; validated by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionDetailsResponse {
    #[serde(with = "ocrloop_codec::bytes")]
    pub config_digest: Vec<u8>,
    pub epoch: u32,
    pub round: u32,
    #[serde(with = "ocrloop_codec::bigint")]
    pub latest_answer: BigInt,
    pub latest_timestamp: DateTime<Utc>,
}

/// Lookback in signed nanoseconds
#[derive(Debug, Serialize, Deserialize)]
struct RoundRequestedRequest {
    lookback_ns: i64,
}

impl RoundRequestedRequest {
    fn new(lookback: Duration) -> Result<Self, ValidationError> {
        let nanos = lookback.as_nanos();
        let lookback_ns = i64::try_from(nanos).map_err(|_| {
            let actual = u64::try_from(nanos).unwrap_or(u64::MAX);
            ValidationError::out_of_range("lookback_ns", i64::MAX.unsigned_abs(), actual)
        })?;
        Ok(Self { lookback_ns })
    }

    fn lookback(&self) -> Result<Duration, ValidationError> {
        u64::try_from(self.lookback_ns)
            .map(Duration::from_nanos)
            .map_err(|_| ValidationError::Negative {
                field: "lookback_ns",
                value: self.lookback_ns,
            })
    }
}

/// Wire form of [`RoundRequested`]; validated by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRequestedResponse {
    #[serde(with = "ocrloop_codec::bytes")]
    pub config_digest: Vec<u8>,
    pub epoch: u32,
    pub round: u32,
}

#[derive(Debug, Clone)]
pub struct MedianContractClient {
    conn: ClientConn,
}

impl MedianContractClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl MedianContract for MedianContractClient {
    async fn latest_transmission_details(&self) -> MedianResult<TransmissionDetails> {
        let reply: TransmissionDetailsResponse = self.conn.call(LATEST_TRANSMISSION_DETAILS, &()).await?;
        Ok(TransmissionDetails {
            config_digest: ConfigDigest::try_from(reply.config_digest.as_slice())?,
            epoch: reply.epoch,
            round: checked_u8("round", reply.round)?,
            latest_answer: reply.latest_answer,
            latest_timestamp: reply.latest_timestamp,
        })
    }

    async fn latest_round_requested(&self, lookback: Duration) -> MedianResult<RoundRequested> {
        let request = RoundRequestedRequest::new(lookback)?;
        let reply: RoundRequestedResponse = self.conn.call(LATEST_ROUND_REQUESTED, &request).await?;
        Ok(RoundRequested {
            config_digest: ConfigDigest::try_from(reply.config_digest.as_slice())?,
            epoch: reply.epoch,
            round: checked_u8("round", reply.round)?,
        })
    }
}

pub struct MedianContractServer {
    inner: Arc<dyn MedianContract>,
}

impl MedianContractServer {
    pub fn new(inner: Arc<dyn MedianContract>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ServiceHandler for MedianContractServer {
    async fn handle(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
        match method {
            "LatestTransmissionDetails" => {
                let details = self.inner.latest_transmission_details().await?;
                encode_response(&TransmissionDetailsResponse {
                    config_digest: details.config_digest.as_bytes().to_vec(),
                    epoch: details.epoch,
                    round: details.round.into(),
                    latest_answer: details.latest_answer,
                    latest_timestamp: details.latest_timestamp,
                })
            }
            "LatestRoundRequested" => {
                let request: RoundRequestedRequest = decode_request(payload)?;
                let lookback = request.lookback().map_err(MedianError::from)?;
                let requested = self.inner.latest_round_requested(lookback).await?;
                encode_response(&RoundRequestedResponse {
                    config_digest: requested.config_digest.as_bytes().to_vec(),
                    epoch: requested.epoch,
                    round: requested.round.into(),
                })
            }
            other => Err(unknown_method(INTERFACE, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{broker_pair, StaticMedianContract};
    use ocrloop_broker::{Broker, BrokerError, FaultKind, Server};

    /// Answers with wire values the typed server could never produce
    struct MalformedContract {
        digest_len: usize,
        round: u32,
    }

    #[async_trait]
    impl ServiceHandler for MalformedContract {
        async fn handle(&self, method: &str, _payload: JsonValue) -> Result<JsonValue, Fault> {
            let config_digest = vec![9; self.digest_len];
            match method {
                "LatestTransmissionDetails" => encode_response(&TransmissionDetailsResponse {
                    config_digest,
                    epoch: 1,
                    round: self.round,
                    latest_answer: BigInt::from(1),
                    latest_timestamp: Utc::now(),
                }),
                "LatestRoundRequested" => encode_response(&RoundRequestedResponse {
                    config_digest,
                    epoch: 1,
                    round: self.round,
                }),
                other => Err(unknown_method(INTERFACE, other)),
            }
        }
    }

    async fn served<F>(register: F) -> (Broker, ClientConn)
    where
        F: FnOnce(&mut Server),
    {
        let (host, plugin) = broker_pair();
        let (id, _) = host.serve_new(INTERFACE, register, Vec::new()).await.unwrap();
        let conn = plugin.dial(INTERFACE, id).await.unwrap();
        (plugin, conn)
    }

    #[tokio::test]
    async fn test_contract_values_cross_the_wire() {
        let contract = Arc::new(StaticMedianContract::default());
        let inner = contract.clone();
        let (_plugin, conn) = served(|s| {
            s.register(INTERFACE, MedianContractServer::new(inner));
        })
        .await;
        let client = MedianContractClient::new(conn);

        assert_eq!(client.latest_transmission_details().await.unwrap(), contract.details);

        let lookback = Duration::from_nanos(1_500_001);
        assert_eq!(client.latest_round_requested(lookback).await.unwrap(), contract.round_requested);
        assert_eq!(contract.lookbacks(), vec![lookback]);
    }

    #[tokio::test]
    async fn test_malformed_details_are_rejected_by_client() {
        for (digest_len, round) in [(31, 1), (33, 1), (32, 256)] {
            let (_plugin, conn) = served(|s| {
                s.register(INTERFACE, MalformedContract { digest_len, round });
            })
            .await;
            let client = MedianContractClient::new(conn);

            let err = client.latest_transmission_details().await.unwrap_err();
            assert!(matches!(err, MedianError::Validation(_)), "{err}");
            let err = client.latest_round_requested(Duration::from_secs(1)).await.unwrap_err();
            assert!(matches!(err, MedianError::Validation(_)), "{err}");

            if round > 255 {
                assert!(err.to_string().contains("round 256"), "{err}");
            } else {
                assert!(matches!(
                    err,
                    MedianError::Validation(ValidationError::DigestLength { actual }) if actual == digest_len
                ));
            }
        }
    }

    #[tokio::test]
    async fn test_negative_lookback_is_a_validation_fault() {
        let contract = Arc::new(StaticMedianContract::default());
        let inner = contract.clone();
        let (_plugin, conn) = served(|s| {
            s.register(INTERFACE, MedianContractServer::new(inner));
        })
        .await;

        let request = RoundRequestedRequest { lookback_ns: -1 };
        let err = conn.call::<_, JsonValue>(LATEST_ROUND_REQUESTED, &request).await.unwrap_err();
        match err {
            BrokerError::Remote(fault) => {
                assert_eq!(fault.kind, FaultKind::Validation);
                assert!(fault.message.contains("lookback_ns"), "{}", fault.message);
            }
            other => panic!("expected validation fault, got {other}"),
        }
        assert!(contract.lookbacks().is_empty());
    }

    #[test]
    fn test_oversized_lookback_is_rejected_before_sending() {
        let err = RoundRequestedRequest::new(Duration::MAX).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { field: "lookback_ns", .. }));
    }
}
