//! Reporting plugin factories and the plugins they create
//!
//! A factory is a composite endpoint: it is registered together with the
//! dependency handles it was built from, and each plugin it creates is
//! registered as a further endpoint through the same broker.

use std::sync::Arc;

use async_trait::async_trait;
use ocrloop_broker::{
    close_all, decode_request, encode_response, unknown_method, Broker, BrokerError, BrokerResult, ClientConn,
    CloseErrors, Closer, Fault, Resource, ResourceSet, Server, ServiceHandler, ServiceId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::{MedianError, MedianResult};
use crate::service::{self, ServiceClient, ServiceServer};
use crate::traits::{ReportingPlugin, ReportingPluginFactory, Service};
use crate::types::{
    AttributedObservation, HealthReport, ReportTimestamp, ReportingPluginConfig, ReportingPluginInfo,
    WireReportTimestamp,
};

pub const FACTORY_INTERFACE: &str = "ReportingPluginFactory";
pub const PLUGIN_INTERFACE: &str = "ReportingPlugin";

const NEW_REPORTING_PLUGIN: &str = "ReportingPluginFactory/NewReportingPlugin";

const QUERY: &str = "ReportingPlugin/Query";
const OBSERVATION: &str = "ReportingPlugin/Observation";
const REPORT: &str = "ReportingPlugin/Report";
const SHOULD_ACCEPT: &str = "ReportingPlugin/ShouldAcceptFinalizedReport";
const SHOULD_TRANSMIT: &str = "ReportingPlugin/ShouldTransmitAcceptedReport";
const CLOSE: &str = "ReportingPlugin/Close";

#[derive(Debug, Serialize, Deserialize)]
struct NewReportingPluginResponse {
    id: ServiceId,
    info: ReportingPluginInfo,
}

#[derive(Debug, Serialize, Deserialize)]
struct TimestampRequest {
    report_timestamp: WireReportTimestamp,
}

#[derive(Debug, Serialize, Deserialize)]
struct QueryMessage {
    #[serde(with = "ocrloop_codec::bytes")]
    query: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObservationRequest {
    report_timestamp: WireReportTimestamp,
    #[serde(with = "ocrloop_codec::bytes")]
    query: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObservationResponse {
    #[serde(with = "ocrloop_codec::bytes")]
    observation: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReportRequest {
    report_timestamp: WireReportTimestamp,
    #[serde(with = "ocrloop_codec::bytes")]
    query: Vec<u8>,
    observations: Vec<AttributedObservation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReportResponse {
    should_report: bool,
    #[serde(with = "ocrloop_codec::bytes")]
    report: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReportDecisionRequest {
    report_timestamp: WireReportTimestamp,
    #[serde(with = "ocrloop_codec::bytes")]
    report: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DecisionResponse {
    result: bool,
}

fn broker_error(err: MedianError) -> BrokerError {
    match err {
        MedianError::Broker(e) => e,
        other => BrokerError::Remote(other.to_fault()),
    }
}

/// Reporting plugin endpoints registered by one factory
///
/// Shared between the factory's server and the resource handed to the
/// factory endpoint as its last dependency, so releasing the factory
/// releases every plugin endpoint it created that is still registered.
#[derive(Clone)]
pub struct CreatedPlugins {
    inner: Arc<Mutex<Option<ResourceSet>>>,
}

impl CreatedPlugins {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(ResourceSet::new()))),
        }
    }

    /// Resource that releases the tracked endpoints, newest first
    pub fn resource(&self) -> Resource {
        Resource::new("reporting plugins", self.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, ResourceSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take ownership of `endpoint`; hands it back once the set is released
    fn track(&self, endpoint: Resource) -> Result<(), Resource> {
        match self.inner.lock().as_mut() {
            Some(set) => {
                set.push(endpoint);
                Ok(())
            }
            None => Err(endpoint),
        }
    }
}

impl Default for CreatedPlugins {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Closer for CreatedPlugins {
    async fn close(&self) -> BrokerResult<()> {
        let released = self.inner.lock().take();
        match released {
            Some(set) => set.close_all().await,
            None => Ok(()),
        }
    }
}

/// Register a factory and its `Service` interface on `server`
///
/// Plugin endpoints the factory creates are recorded in `created`.
pub fn register_factory(
    server: &mut Server,
    broker: Broker,
    factory: Arc<dyn ReportingPluginFactory>,
    created: CreatedPlugins,
) {
    server
        .register(
            FACTORY_INTERFACE,
            ReportingPluginFactoryServer {
                broker,
                factory: factory.clone(),
                created,
            },
        )
        .register(service::INTERFACE, ServiceServer::new(factory));
}

struct ReportingPluginFactoryServer {
    broker: Broker,
    factory: Arc<dyn ReportingPluginFactory>,
    created: CreatedPlugins,
}

#[async_trait]
impl ServiceHandler for ReportingPluginFactoryServer {
    async fn handle(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
        match method {
            "NewReportingPlugin" => {
                let config: ReportingPluginConfig = decode_request(payload)?;
                let (plugin, info) = self.factory.new_reporting_plugin(config).await?;

                let served = plugin.clone();
                let registered = self
                    .broker
                    .serve_new(
                        PLUGIN_INTERFACE,
                        |s| {
                            s.register(PLUGIN_INTERFACE, ReportingPluginServer { inner: served });
                        },
                        Vec::new(),
                    )
                    .await
                    .map(|(id, endpoint)| (id, self.created.track(endpoint).err()));

                match registered {
                    Ok((id, None)) => {
                        debug!(service_id = id, plugin = %info.name, "registered reporting plugin");
                        encode_response(&NewReportingPluginResponse { id, info })
                    }
                    Ok((id, Some(endpoint))) => {
                        warn!(service_id = id, plugin = %info.name, "factory released while creating reporting plugin");
                        if let Err(e) = endpoint.close().await {
                            warn!(service_id = id, error = %e, "failed to release orphaned reporting plugin");
                        }
                        if let Err(close_err) = plugin.close().await {
                            warn!(error = %close_err, "failed to close orphaned reporting plugin");
                        }
                        Err(BrokerError::closed(FACTORY_INTERFACE).to_fault())
                    }
                    Err(e) => {
                        if let Err(close_err) = plugin.close().await {
                            warn!(error = %close_err, "failed to close unregistered reporting plugin");
                        }
                        Err(e.to_fault())
                    }
                }
            }
            other => Err(unknown_method(FACTORY_INTERFACE, other)),
        }
    }
}

/// Host-side handle to a factory living in a plugin
///
/// Owns the dependency endpoints served for it. Closing closes the remote
/// factory, asks the plugin to release the composite, then releases the
/// local dependencies in reverse order.
pub struct ReportingPluginFactoryClient {
    broker: Broker,
    conn: ClientConn,
    service: ServiceClient,
    deps: Mutex<Option<Vec<Resource>>>,
}

impl ReportingPluginFactoryClient {
    pub fn new(broker: Broker, conn: ClientConn, deps: Vec<Resource>) -> Self {
        Self {
            broker,
            service: ServiceClient::new(conn.clone()),
            conn,
            deps: Mutex::new(Some(deps)),
        }
    }

    pub fn service_id(&self) -> ServiceId {
        self.conn.service_id()
    }
}

#[async_trait]
impl Service for ReportingPluginFactoryClient {
    async fn name(&self) -> MedianResult<String> {
        self.service.name().await
    }

    async fn start(&self) -> MedianResult<()> {
        self.service.start().await
    }

    async fn close(&self) -> MedianResult<()> {
        let Some(deps) = self.deps.lock().take() else {
            return Ok(());
        };

        let mut errors = CloseErrors::default();
        if let Err(e) = self.service.close().await {
            errors.push(self.conn.name(), broker_error(e));
        }
        if let Err(e) = self.broker.release_remote(self.conn.service_id()).await {
            errors.push(self.conn.name(), e);
        }
        self.conn.close();
        if let Err(e) = close_all(deps.iter().rev()).await {
            errors.push("dependencies", e);
        }

        Ok(errors.into_result()?)
    }

    async fn ready(&self) -> MedianResult<()> {
        self.service.ready().await
    }

    async fn health_report(&self) -> MedianResult<HealthReport> {
        self.service.health_report().await
    }
}

#[async_trait]
impl ReportingPluginFactory for ReportingPluginFactoryClient {
    async fn new_reporting_plugin(
        &self,
        config: ReportingPluginConfig,
    ) -> MedianResult<(Arc<dyn ReportingPlugin>, ReportingPluginInfo)> {
        let reply: NewReportingPluginResponse = self.conn.call(NEW_REPORTING_PLUGIN, &config).await?;

        let conn = match self.broker.dial(PLUGIN_INTERFACE, reply.id).await {
            Ok(conn) => conn,
            Err(e) => {
                if let Err(release_err) = self.broker.release_remote(reply.id).await {
                    warn!(service_id = reply.id, error = %release_err, "failed to release undialed reporting plugin");
                }
                return Err(e.into());
            }
        };

        let plugin = ReportingPluginClient {
            broker: self.broker.clone(),
            conn,
        };
        Ok((Arc::new(plugin), reply.info))
    }
}

struct ReportingPluginServer {
    inner: Arc<dyn ReportingPlugin>,
}

fn timestamp(wire: WireReportTimestamp) -> Result<ReportTimestamp, Fault> {
    ReportTimestamp::try_from(wire).map_err(|e| MedianError::from(e).to_fault())
}

#[async_trait]
impl ServiceHandler for ReportingPluginServer {
    async fn handle(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
        match method {
            "Query" => {
                let request: TimestampRequest = decode_request(payload)?;
                let query = self.inner.query(timestamp(request.report_timestamp)?).await?;
                encode_response(&QueryMessage { query })
            }
            "Observation" => {
                let request: ObservationRequest = decode_request(payload)?;
                let observation = self
                    .inner
                    .observation(timestamp(request.report_timestamp)?, &request.query)
                    .await?;
                encode_response(&ObservationResponse { observation })
            }
            "Report" => {
                let request: ReportRequest = decode_request(payload)?;
                let (should_report, report) = self
                    .inner
                    .report(timestamp(request.report_timestamp)?, &request.query, &request.observations)
                    .await?;
                encode_response(&ReportResponse { should_report, report })
            }
            "ShouldAcceptFinalizedReport" => {
                let request: ReportDecisionRequest = decode_request(payload)?;
                let result = self
                    .inner
                    .should_accept_finalized_report(timestamp(request.report_timestamp)?, &request.report)
                    .await?;
                encode_response(&DecisionResponse { result })
            }
            "ShouldTransmitAcceptedReport" => {
                let request: ReportDecisionRequest = decode_request(payload)?;
                let result = self
                    .inner
                    .should_transmit_accepted_report(timestamp(request.report_timestamp)?, &request.report)
                    .await?;
                encode_response(&DecisionResponse { result })
            }
            "Close" => encode_response(&self.inner.close().await?),
            other => Err(unknown_method(PLUGIN_INTERFACE, other)),
        }
    }
}

/// Host-side handle to a reporting plugin instance
pub struct ReportingPluginClient {
    broker: Broker,
    conn: ClientConn,
}

#[async_trait]
impl ReportingPlugin for ReportingPluginClient {
    async fn query(&self, timestamp: ReportTimestamp) -> MedianResult<Vec<u8>> {
        let request = TimestampRequest {
            report_timestamp: (&timestamp).into(),
        };
        let reply: QueryMessage = self.conn.call(QUERY, &request).await?;
        Ok(reply.query)
    }

    async fn observation(&self, timestamp: ReportTimestamp, query: &[u8]) -> MedianResult<Vec<u8>> {
        let request = ObservationRequest {
            report_timestamp: (&timestamp).into(),
            query: query.to_vec(),
        };
        let reply: ObservationResponse = self.conn.call(OBSERVATION, &request).await?;
        Ok(reply.observation)
    }

    async fn report(
        &self,
        timestamp: ReportTimestamp,
        query: &[u8],
        observations: &[AttributedObservation],
    ) -> MedianResult<(bool, Vec<u8>)> {
        let request = ReportRequest {
            report_timestamp: (&timestamp).into(),
            query: query.to_vec(),
            observations: observations.to_vec(),
        };
        let reply: ReportResponse = self.conn.call(REPORT, &request).await?;
        Ok((reply.should_report, reply.report))
    }

    async fn should_accept_finalized_report(&self, timestamp: ReportTimestamp, report: &[u8]) -> MedianResult<bool> {
        let request = ReportDecisionRequest {
            report_timestamp: (&timestamp).into(),
            report: report.to_vec(),
        };
        let reply: DecisionResponse = self.conn.call(SHOULD_ACCEPT, &request).await?;
        Ok(reply.result)
    }

    async fn should_transmit_accepted_report(&self, timestamp: ReportTimestamp, report: &[u8]) -> MedianResult<bool> {
        let request = ReportDecisionRequest {
            report_timestamp: (&timestamp).into(),
            report: report.to_vec(),
        };
        let reply: DecisionResponse = self.conn.call(SHOULD_TRANSMIT, &request).await?;
        Ok(reply.result)
    }

    async fn close(&self) -> MedianResult<()> {
        if self.conn.is_closed() {
            return Ok(());
        }
        let closed = self.conn.call::<_, ()>(CLOSE, &()).await;
        let released = self.broker.release_remote(self.conn.service_id()).await;
        self.conn.close();
        closed?;
        released?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Closer for Recorder {
        async fn close(&self) -> BrokerResult<()> {
            self.log.lock().push(self.name);
            Ok(())
        }
    }

    fn recorded(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Resource {
        Resource::new(name, Recorder { name, log: log.clone() })
    }

    #[tokio::test]
    async fn test_created_plugins_release_newest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let created = CreatedPlugins::new();
        assert!(created.track(recorded("first", &log)).is_ok());
        assert!(created.track(recorded("second", &log)).is_ok());
        assert_eq!(created.len(), 2);

        let owner = created.resource();
        owner.close().await.unwrap();
        assert_eq!(*log.lock(), vec!["second", "first"]);
        assert!(created.is_empty());

        // a plugin created after release is handed back to the caller
        let late = created.track(recorded("late", &log)).unwrap_err();
        assert_eq!(late.name(), "late");
        assert_eq!(log.lock().len(), 2);
    }
}
