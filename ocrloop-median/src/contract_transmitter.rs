//! Client and server for `ContractTransmitter`

use std::sync::Arc;

use async_trait::async_trait;
use ocrloop_broker::{decode_request, encode_response, unknown_method, ClientConn, Fault, ServiceHandler};
use ocrloop_codec::ConfigDigest;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{MedianError, MedianResult};
use crate::traits::ContractTransmitter;
use crate::types::{AttributedOnchainSignature, ReportContext, WireReportContext};

pub const INTERFACE: &str = "ContractTransmitter";

const TRANSMIT: &str = "ContractTransmitter/Transmit";
const LATEST_CONFIG_DIGEST_AND_EPOCH: &str = "ContractTransmitter/LatestConfigDigestAndEpoch";
const FROM_ACCOUNT: &str = "ContractTransmitter/FromAccount";

#[derive(Debug, Serialize, Deserialize)]
struct TransmitRequest {
    report_context: WireReportContext,
    #[serde(with = "ocrloop_codec::bytes")]
    report: Vec<u8>,
    signatures: Vec<AttributedOnchainSignature>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DigestAndEpochResponse {
    #[serde(with = "ocrloop_codec::bytes")]
    config_digest: Vec<u8>,
    epoch: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct FromAccountResponse {
    account: String,
}

#[derive(Debug, Clone)]
pub struct ContractTransmitterClient {
    conn: ClientConn,
}

impl ContractTransmitterClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ContractTransmitter for ContractTransmitterClient {
    async fn transmit(
        &self,
        context: &ReportContext,
        report: &[u8],
        signatures: &[AttributedOnchainSignature],
    ) -> MedianResult<()> {
        let request = TransmitRequest {
            report_context: context.into(),
            report: report.to_vec(),
            signatures: signatures.to_vec(),
        };
        self.conn.call::<_, ()>(TRANSMIT, &request).await?;
        Ok(())
    }

    async fn latest_config_digest_and_epoch(&self) -> MedianResult<(ConfigDigest, u32)> {
        let reply: DigestAndEpochResponse = self.conn.call(LATEST_CONFIG_DIGEST_AND_EPOCH, &()).await?;
        let digest = ConfigDigest::try_from(reply.config_digest.as_slice())?;
        Ok((digest, reply.epoch))
    }

    async fn from_account(&self) -> MedianResult<String> {
        let reply: FromAccountResponse = self.conn.call(FROM_ACCOUNT, &()).await?;
        Ok(reply.account)
    }
}

pub struct ContractTransmitterServer {
    inner: Arc<dyn ContractTransmitter>,
}

impl ContractTransmitterServer {
    pub fn new(inner: Arc<dyn ContractTransmitter>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ServiceHandler for ContractTransmitterServer {
    async fn handle(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
        match method {
            "Transmit" => {
                let request: TransmitRequest = decode_request(payload)?;
                let context = ReportContext::try_from(request.report_context).map_err(MedianError::from)?;
                encode_response(&self.inner.transmit(&context, &request.report, &request.signatures).await?)
            }
            "LatestConfigDigestAndEpoch" => {
                let (digest, epoch) = self.inner.latest_config_digest_and_epoch().await?;
                encode_response(&DigestAndEpochResponse {
                    config_digest: digest.as_bytes().to_vec(),
                    epoch,
                })
            }
            "FromAccount" => encode_response(&FromAccountResponse {
                account: self.inner.from_account().await?,
            }),
            other => Err(unknown_method(INTERFACE, other)),
        }
    }
}
