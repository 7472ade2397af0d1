//! Client and server for `ReportCodec`

use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigInt;
use ocrloop_broker::{decode_request, encode_response, unknown_method, ClientConn, Fault, ServiceHandler};
use ocrloop_codec::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{MedianError, MedianResult};
use crate::traits::ReportCodec;
use crate::types::{ParsedAttributedObservation, WireObservation};

pub const INTERFACE: &str = "ReportCodec";

const BUILD_REPORT: &str = "ReportCodec/BuildReport";
const MEDIAN_FROM_REPORT: &str = "ReportCodec/MedianFromReport";
const MAX_REPORT_LENGTH: &str = "ReportCodec/MaxReportLength";

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildReportRequest {
    pub observations: Vec<WireObservation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReportMessage {
    #[serde(with = "ocrloop_codec::bytes")]
    report: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MedianResponse {
    #[serde(with = "ocrloop_codec::bigint")]
    median: BigInt,
}

#[derive(Debug, Serialize, Deserialize)]
struct MaxReportLengthRequest {
    n: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct MaxReportLengthResponse {
    max: u64,
}

#[derive(Debug, Clone)]
pub struct ReportCodecClient {
    conn: ClientConn,
}

impl ReportCodecClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ReportCodec for ReportCodecClient {
    async fn build_report(&self, observations: &[ParsedAttributedObservation]) -> MedianResult<Vec<u8>> {
        let request = BuildReportRequest {
            observations: observations.iter().map(WireObservation::from).collect(),
        };
        let reply: ReportMessage = self.conn.call(BUILD_REPORT, &request).await?;
        Ok(reply.report)
    }

    async fn median_from_report(&self, report: &[u8]) -> MedianResult<BigInt> {
        let request = ReportMessage { report: report.to_vec() };
        let reply: MedianResponse = self.conn.call(MEDIAN_FROM_REPORT, &request).await?;
        Ok(reply.median)
    }

    async fn max_report_length(&self, n: usize) -> MedianResult<usize> {
        let request = MaxReportLengthRequest { n: to_wire("n", n)? };
        let reply: MaxReportLengthResponse = self.conn.call(MAX_REPORT_LENGTH, &request).await?;
        Ok(from_wire("max report length", reply.max)?)
    }
}

pub struct ReportCodecServer {
    inner: Arc<dyn ReportCodec>,
}

impl ReportCodecServer {
    pub fn new(inner: Arc<dyn ReportCodec>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ServiceHandler for ReportCodecServer {
    async fn handle(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
        match method {
            "BuildReport" => {
                let request: BuildReportRequest = decode_request(payload)?;
                let observations = request
                    .observations
                    .into_iter()
                    .map(ParsedAttributedObservation::try_from)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(MedianError::from)?;
                let report = self.inner.build_report(&observations).await?;
                encode_response(&ReportMessage { report })
            }
            "MedianFromReport" => {
                let request: ReportMessage = decode_request(payload)?;
                let median = self.inner.median_from_report(&request.report).await?;
                encode_response(&MedianResponse { median })
            }
            "MaxReportLength" => {
                let request: MaxReportLengthRequest = decode_request(payload)?;
                let n = from_wire("n", request.n).map_err(MedianError::from)?;
                let max = self.inner.max_report_length(n).await?;
                encode_response(&MaxReportLengthResponse {
                    max: to_wire("max report length", max).map_err(MedianError::from)?,
                })
            }
            other => Err(unknown_method(INTERFACE, other)),
        }
    }
}

fn to_wire(field: &'static str, value: usize) -> Result<u64, ValidationError> {
    u64::try_from(value).map_err(|_| ValidationError::out_of_range(field, u64::MAX, u64::MAX))
}

fn from_wire(field: &'static str, value: u64) -> Result<usize, ValidationError> {
    usize::try_from(value).map_err(|_| ValidationError::out_of_range(field, usize::MAX as u64, value))
}
