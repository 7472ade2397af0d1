//! Client and server for the generic `Service` interface

use std::sync::Arc;

use async_trait::async_trait;
use ocrloop_broker::{encode_response, unknown_method, ClientConn, Fault, ServiceHandler};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::MedianResult;
use crate::traits::Service;
use crate::types::HealthReport;

pub const INTERFACE: &str = "Service";

const NAME: &str = "Service/Name";
const START: &str = "Service/Start";
const CLOSE: &str = "Service/Close";
const READY: &str = "Service/Ready";
const HEALTH_REPORT: &str = "Service/HealthReport";

#[derive(Debug, Serialize, Deserialize)]
struct NameResponse {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthReportResponse {
    report: HealthReport,
}

/// Remote [`Service`] behind a dialed connection
#[derive(Debug, Clone)]
pub struct ServiceClient {
    conn: ClientConn,
}

impl ServiceClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Service for ServiceClient {
    async fn name(&self) -> MedianResult<String> {
        let reply: NameResponse = self.conn.call(NAME, &()).await?;
        Ok(reply.name)
    }

    async fn start(&self) -> MedianResult<()> {
        self.conn.call::<_, ()>(START, &()).await?;
        Ok(())
    }

    async fn close(&self) -> MedianResult<()> {
        self.conn.call::<_, ()>(CLOSE, &()).await?;
        Ok(())
    }

    async fn ready(&self) -> MedianResult<()> {
        self.conn.call::<_, ()>(READY, &()).await?;
        Ok(())
    }

    async fn health_report(&self) -> MedianResult<HealthReport> {
        let reply: HealthReportResponse = self.conn.call(HEALTH_REPORT, &()).await?;
        Ok(reply.report)
    }
}

/// Serves any [`Service`] implementation
pub struct ServiceServer<S: ?Sized> {
    inner: Arc<S>,
}

impl<S: ?Sized> ServiceServer<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> ServiceHandler for ServiceServer<S>
where
    S: Service + ?Sized + 'static,
{
    async fn handle(&self, method: &str, _payload: JsonValue) -> Result<JsonValue, Fault> {
        match method {
            "Name" => encode_response(&NameResponse {
                name: self.inner.name().await?,
            }),
            "Start" => encode_response(&self.inner.start().await?),
            "Close" => encode_response(&self.inner.close().await?),
            "Ready" => encode_response(&self.inner.ready().await?),
            "HealthReport" => encode_response(&HealthReportResponse {
                report: self.inner.health_report().await?,
            }),
            other => Err(unknown_method(INTERFACE, other)),
        }
    }
}
