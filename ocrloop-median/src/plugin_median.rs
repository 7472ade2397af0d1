//! Median factory construction across the plugin boundary
//!
//! The host serves the four dependencies of a factory through its broker
//! and sends their ids in one `NewMedianFactory` call. The plugin dials
//! them in a fixed order, builds the factory and registers it as a single
//! composite endpoint that owns the four dialed handles. Every step is
//! sequential, and a failure at any step releases what the failing side
//! already acquired, newest first.

use std::sync::Arc;

use async_trait::async_trait;
use ocrloop_broker::{
    decode_request, encode_response, unknown_method, Backing, Broker, ClientConn, Fault, ResourceSet, Server,
    ServiceHandler, ServiceId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::data_source::{self, DataSourceClient, DataSourceServer};
use crate::error::{MedianError, MedianResult};
use crate::error_log::{self, ErrorLogClient, ErrorLogServer};
use crate::provider::{register_provider, MedianProviderClient};
use crate::reporting_plugin::{register_factory, CreatedPlugins, ReportingPluginFactoryClient};
use crate::traits::{DataSource, ErrorLog, MedianProvider, PluginMedian, ReportingPluginFactory};

pub const INTERFACE: &str = "PluginMedian";

/// Name the median plugin is dispensed under
pub const PLUGIN_NAME: &str = "median";

const NEW_MEDIAN_FACTORY: &str = "PluginMedian/NewMedianFactory";

pub const DATA_SOURCE: &str = "DataSource";
pub const JUELS_PER_FEE_COIN_DATA_SOURCE: &str = "JuelsPerFeeCoinDataSource";
pub const MEDIAN_PROVIDER: &str = "MedianProvider";
pub const ERROR_LOG: &str = "ErrorLog";
pub const REPORTING_PLUGIN_FACTORY: &str = "ReportingPluginFactory";

/// Ids of the four dependencies a factory is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMedianFactoryRequest {
    pub data_source_id: ServiceId,
    pub juels_per_fee_coin_data_source_id: ServiceId,
    pub provider_id: ServiceId,
    pub error_log_id: ServiceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMedianFactoryResponse {
    pub factory_id: ServiceId,
}

/// Host-side handle to a dispensed median plugin
#[derive(Clone)]
pub struct PluginMedianClient {
    broker: Broker,
    conn: ClientConn,
}

impl PluginMedianClient {
    pub fn new(broker: Broker, conn: ClientConn) -> Self {
        Self {
            broker: broker.with_name("PluginMedianClient"),
            conn,
        }
    }

    async fn serve_dependencies(
        &self,
        acquired: &mut ResourceSet,
        provider: Arc<dyn MedianProvider>,
        data_source: Arc<dyn DataSource>,
        juels_per_fee_coin: Arc<dyn DataSource>,
        error_log: Arc<dyn ErrorLog>,
    ) -> MedianResult<NewMedianFactoryRequest> {
        let (data_source_id, resource) = self
            .broker
            .serve_new(
                DATA_SOURCE,
                |s| {
                    s.register(data_source::INTERFACE, DataSourceServer::new(data_source));
                },
                Vec::new(),
            )
            .await?;
        acquired.push(resource);

        let (juels_per_fee_coin_data_source_id, resource) = self
            .broker
            .serve_new(
                JUELS_PER_FEE_COIN_DATA_SOURCE,
                |s| {
                    s.register(data_source::INTERFACE, DataSourceServer::new(juels_per_fee_coin));
                },
                Vec::new(),
            )
            .await?;
        acquired.push(resource);

        let (provider_id, resource) = match provider.backing() {
            Backing::Connected(conn) => {
                debug!(logger = %self.broker.name(), "proxying provider connection");
                self.broker.serve(MEDIAN_PROVIDER, conn.clone()).await?
            }
            Backing::NeedsRegistration => {
                let provider = provider.clone();
                self.broker
                    .serve_new(MEDIAN_PROVIDER, |s| register_provider(s, provider), Vec::new())
                    .await?
            }
        };
        acquired.push(resource);

        let (error_log_id, resource) = self
            .broker
            .serve_new(
                ERROR_LOG,
                |s| {
                    s.register(error_log::INTERFACE, ErrorLogServer::new(error_log));
                },
                Vec::new(),
            )
            .await?;
        acquired.push(resource);

        Ok(NewMedianFactoryRequest {
            data_source_id,
            juels_per_fee_coin_data_source_id,
            provider_id,
            error_log_id,
        })
    }
}

#[async_trait]
impl PluginMedian for PluginMedianClient {
    async fn new_median_factory(
        &self,
        provider: Arc<dyn MedianProvider>,
        data_source: Arc<dyn DataSource>,
        juels_per_fee_coin_data_source: Arc<dyn DataSource>,
        error_log: Arc<dyn ErrorLog>,
    ) -> MedianResult<Arc<dyn ReportingPluginFactory>> {
        let mut acquired = ResourceSet::new();

        let request = match self
            .serve_dependencies(&mut acquired, provider, data_source, juels_per_fee_coin_data_source, error_log)
            .await
        {
            Ok(request) => request,
            Err(e) => {
                acquired.rollback().await;
                return Err(e);
            }
        };

        let reply: NewMedianFactoryResponse = match self.conn.call(NEW_MEDIAN_FACTORY, &request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(logger = %self.broker.name(), error = %e, "plugin failed to build median factory");
                acquired.rollback().await;
                return Err(e.into());
            }
        };

        let conn = match self.broker.dial(REPORTING_PLUGIN_FACTORY, reply.factory_id).await {
            Ok(conn) => conn,
            Err(e) => {
                if let Err(release_err) = self.broker.release_remote(reply.factory_id).await {
                    warn!(service_id = reply.factory_id, error = %release_err, "failed to release undialed factory");
                }
                acquired.rollback().await;
                return Err(e.into());
            }
        };

        info!(logger = %self.broker.name(), service_id = reply.factory_id, "median factory ready");
        Ok(Arc::new(ReportingPluginFactoryClient::new(
            self.broker.clone(),
            conn,
            acquired.into_vec(),
        )))
    }
}

/// Plugin-side server for `PluginMedian`
pub struct PluginMedianServer {
    broker: Broker,
    inner: Arc<dyn PluginMedian>,
}

impl PluginMedianServer {
    pub fn new(broker: Broker, inner: Arc<dyn PluginMedian>) -> Self {
        Self {
            broker: broker.with_name("PluginMedianServer"),
            inner,
        }
    }

    /// Register the median plugin on `server`
    pub fn register(server: &mut Server, broker: Broker, inner: Arc<dyn PluginMedian>) {
        server.register(INTERFACE, Self::new(broker, inner));
    }

    async fn dial_into(&self, acquired: &mut ResourceSet, name: &str, id: ServiceId) -> MedianResult<ClientConn> {
        let conn = self.broker.dial(name, id).await?;
        acquired.push(conn.resource());
        Ok(conn)
    }

    async fn new_median_factory(&self, request: NewMedianFactoryRequest) -> MedianResult<ServiceId> {
        let mut acquired = ResourceSet::new();

        let dialed = async {
            let data_source = self.dial_into(&mut acquired, DATA_SOURCE, request.data_source_id).await?;
            let juels = self
                .dial_into(
                    &mut acquired,
                    JUELS_PER_FEE_COIN_DATA_SOURCE,
                    request.juels_per_fee_coin_data_source_id,
                )
                .await?;
            let provider = self.dial_into(&mut acquired, MEDIAN_PROVIDER, request.provider_id).await?;
            let error_log = self.dial_into(&mut acquired, ERROR_LOG, request.error_log_id).await?;
            Ok::<_, MedianError>((data_source, juels, provider, error_log))
        }
        .await;

        let (data_source, juels, provider, error_log) = match dialed {
            Ok(dialed) => dialed,
            Err(e) => {
                warn!(logger = %self.broker.name(), error = %e, "failed to dial factory dependencies");
                acquired.rollback().await;
                return Err(e);
            }
        };

        let built = self
            .inner
            .new_median_factory(
                Arc::new(MedianProviderClient::new(provider)),
                Arc::new(DataSourceClient::new(data_source)),
                Arc::new(DataSourceClient::new(juels)),
                Arc::new(ErrorLogClient::new(error_log)),
            )
            .await;

        let factory = match built {
            Ok(factory) => factory,
            Err(e) => {
                warn!(logger = %self.broker.name(), error = %e, "median factory construction failed");
                acquired.rollback().await;
                return Err(e);
            }
        };

        let created = CreatedPlugins::new();
        acquired.push(created.resource());

        let broker = self.broker.clone();
        let (id, _) = self
            .broker
            .serve_new(
                REPORTING_PLUGIN_FACTORY,
                |s| register_factory(s, broker, factory, created),
                acquired.into_vec(),
            )
            .await?;

        info!(logger = %self.broker.name(), service_id = id, "registered median factory");
        Ok(id)
    }
}

#[async_trait]
impl ServiceHandler for PluginMedianServer {
    async fn handle(&self, method: &str, payload: JsonValue) -> Result<JsonValue, Fault> {
        match method {
            "NewMedianFactory" => {
                let request: NewMedianFactoryRequest = decode_request(payload)?;
                let factory_id = self.new_median_factory(request).await?;
                encode_response(&NewMedianFactoryResponse { factory_id })
            }
            other => Err(unknown_method(INTERFACE, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        broker_pair, digest, StaticDataSource, StaticErrorLog, StaticPluginMedian, StaticProvider,
    };
    use crate::traits::{ReportingPlugin, Service};
    use crate::types::{AttributedObservation, ParsedAttributedObservation, ReportTimestamp, ReportingPluginConfig};
    use num_bigint::BigInt;
    use ocrloop_broker::{BrokerError, FaultKind};
    use ocrloop_codec::serialize_signed;
    use std::time::Duration;

    async fn dispense(host: &Broker, plugin: &Broker, inner: StaticPluginMedian) -> (PluginMedianClient, ClientConn) {
        let plugin_broker = plugin.clone();
        plugin
            .serve_plugin(PLUGIN_NAME, |s| PluginMedianServer::register(s, plugin_broker, Arc::new(inner)))
            .await
            .unwrap();

        let dispensed = host.dispense(PLUGIN_NAME).await.unwrap();
        assert_eq!(dispensed.interfaces, vec![INTERFACE.to_string()]);
        let conn = host.dial(PLUGIN_NAME, dispensed.id).await.unwrap();
        (PluginMedianClient::new(host.clone(), conn.clone()), conn)
    }

    fn plugin_config() -> ReportingPluginConfig {
        ReportingPluginConfig {
            config_digest: digest(1),
            oracle_id: 0,
            n: 4,
            f: 1,
            onchain_config: Vec::new(),
            offchain_config: Vec::new(),
            estimated_round_interval: Duration::from_secs(1),
            max_duration_query: Duration::from_secs(1),
            max_duration_observation: Duration::from_secs(1),
            max_duration_report: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_factory_reports_through_provider() {
        let (host, plugin) = broker_pair();
        let (client, _) = dispense(&host, &plugin, StaticPluginMedian::default()).await;

        let provider = Arc::new(StaticProvider::default());
        let data_source = Arc::new(StaticDataSource::new(5));
        let juels = Arc::new(StaticDataSource::new(2));
        let error_log = Arc::new(StaticErrorLog::default());

        let factory = client
            .new_median_factory(provider.clone(), data_source.clone(), juels.clone(), error_log.clone())
            .await
            .unwrap();
        assert_eq!(host.stats().endpoints, 4);
        assert_eq!(plugin.stats().endpoints, 2);
        assert_eq!(plugin.stats().open_dials, 4);
        assert_eq!(factory.name().await.unwrap(), "StaticMedianFactory");

        let (reporting, info) = factory.new_reporting_plugin(plugin_config()).await.unwrap();
        assert_eq!(info.name, "StaticMedian");
        assert_eq!(info.limits.max_report_length, 4 * 69);

        let ts = ReportTimestamp {
            config_digest: digest(1),
            epoch: 100,
            round: 1,
        };
        let observation = reporting.observation(ts, &[]).await.unwrap();
        assert_eq!(observation, serialize_signed(32, &BigInt::from(5)).unwrap());
        assert_eq!(data_source.observed(), vec![ts]);

        let (should_report, report) = reporting
            .report(
                ts,
                &[],
                &[AttributedObservation {
                    observation,
                    observer: 3,
                }],
            )
            .await
            .unwrap();
        assert!(should_report);
        assert_eq!(
            provider.codec.builds(),
            vec![vec![ParsedAttributedObservation {
                timestamp: 100,
                value: BigInt::from(5),
                juels_per_fee_coin: BigInt::from(2),
                observer: 3,
            }]]
        );
        assert!(reporting.should_accept_finalized_report(ts, &report).await.unwrap());
        assert!(error_log.messages().is_empty());

        reporting.close().await.unwrap();
        assert_eq!(plugin.stats().endpoints, 2);

        factory.close().await.unwrap();
        assert_eq!(host.stats().endpoints, 0);
        assert_eq!(plugin.stats().endpoints, 1);
        assert_eq!(plugin.stats().open_dials, 0);

        // second close is a no-op
        factory.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_factory_close_releases_unclosed_reporting_plugins() {
        let (host, plugin) = broker_pair();
        let (client, _) = dispense(&host, &plugin, StaticPluginMedian::default()).await;

        let factory = client
            .new_median_factory(
                Arc::new(StaticProvider::default()),
                Arc::new(StaticDataSource::new(5)),
                Arc::new(StaticDataSource::new(2)),
                Arc::new(StaticErrorLog::default()),
            )
            .await
            .unwrap();

        let (first, _) = factory.new_reporting_plugin(plugin_config()).await.unwrap();
        let (second, _) = factory.new_reporting_plugin(plugin_config()).await.unwrap();
        assert_eq!(plugin.stats().endpoints, 4);

        // one closed properly, one abandoned
        first.close().await.unwrap();
        drop(second);
        assert_eq!(plugin.stats().endpoints, 3);

        factory.close().await.unwrap();
        assert_eq!(host.stats().endpoints, 0);
        assert_eq!(plugin.stats().endpoints, 1);
        assert_eq!(plugin.stats().open_dials, 0);
    }

    #[tokio::test]
    async fn test_failed_construction_releases_everything() {
        let (host, plugin) = broker_pair();
        let (client, _) = dispense(&host, &plugin, StaticPluginMedian::failing("no feeds configured")).await;

        let err = client
            .new_median_factory(
                Arc::new(StaticProvider::default()),
                Arc::new(StaticDataSource::new(5)),
                Arc::new(StaticDataSource::new(2)),
                Arc::new(StaticErrorLog::default()),
            )
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("no feeds configured"), "{err}");

        assert_eq!(host.stats().endpoints, 0);
        assert_eq!(plugin.stats().endpoints, 1);
        assert_eq!(plugin.stats().open_dials, 0);
    }

    #[tokio::test]
    async fn test_bad_dependency_id_rolls_back_earlier_dials() {
        let (host, plugin) = broker_pair();
        let (_, conn) = dispense(&host, &plugin, StaticPluginMedian::default()).await;

        let mut served = ResourceSet::new();
        let mut ids = Vec::new();
        for name in [DATA_SOURCE, JUELS_PER_FEE_COIN_DATA_SOURCE, ERROR_LOG] {
            let source = Arc::new(StaticDataSource::new(1));
            let (id, resource) = host
                .serve_new(
                    name,
                    |s| {
                        s.register(data_source::INTERFACE, DataSourceServer::new(source));
                    },
                    Vec::new(),
                )
                .await
                .unwrap();
            ids.push(id);
            served.push(resource);
        }

        let request = NewMedianFactoryRequest {
            data_source_id: ids[0],
            juels_per_fee_coin_data_source_id: ids[1],
            provider_id: 999,
            error_log_id: ids[2],
        };
        let err = conn
            .call::<_, NewMedianFactoryResponse>(NEW_MEDIAN_FACTORY, &request)
            .await
            .unwrap_err();
        let err = MedianError::from(err);
        assert_eq!(err.failed_dependency(), Some(MEDIAN_PROVIDER));
        assert!(matches!(&err, MedianError::Broker(BrokerError::Remote(f)) if f.kind == FaultKind::Dial));

        assert_eq!(plugin.stats().open_dials, 0);
        assert_eq!(plugin.stats().endpoints, 1);

        served.close_all().await.unwrap();
        assert_eq!(host.stats().endpoints, 0);
    }
}
