//! Client and server for `DataSource`

use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigInt;
use ocrloop_broker::{decode_request, encode_response, unknown_method, ClientConn, Fault, ServiceHandler};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{MedianError, MedianResult};
use crate::traits::DataSource;
use crate::types::{ReportTimestamp, WireReportTimestamp};

pub const INTERFACE: &str = "DataSource";

const OBSERVE: &str = "DataSource/Observe";

#[derive(Debug, Serialize, Deserialize)]
struct ObserveRequest {
    report_timestamp: WireReportTimestamp,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObserveResponse {
    #[serde(with = "ocrloop_codec::bigint")]
    value: BigInt,
}

#[derive(Debug, Clone)]
pub struct DataSourceClient {
    conn: ClientConn,
}

impl DataSourceClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DataSource for DataSourceClient {
    async fn observe(&self, timestamp: ReportTimestamp) -> MedianResult<BigInt> {
        let request = ObserveRequest {
            report_timestamp: (&timestamp).into(),
        };
        let reply: ObserveResponse = self.conn.call(OBSERVE, &request).await?;
        Ok(reply.value)
    }
}

pub struct DataSourceServer {
    inner: Arc<dyn DataSource>,
}

impl DataSourceServer {
    pub fn new(inner: Arc<dyn DataSource>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ServiceHandler for DataSourceServer {
    async fn handle(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
        match method {
            "Observe" => {
                let request: ObserveRequest = decode_request(payload)?;
                let timestamp = ReportTimestamp::try_from(request.report_timestamp).map_err(MedianError::from)?;
                let value = self.inner.observe(timestamp).await?;
                encode_response(&ObserveResponse { value })
            }
            other => Err(unknown_method(INTERFACE, other)),
        }
    }
}
