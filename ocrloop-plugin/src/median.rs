//! Host-side median plugin service

use std::sync::Arc;

use async_trait::async_trait;
use ocrloop_config::{LoopConfig, PluginConfig};
use ocrloop_median::plugin_median::{self, PLUGIN_NAME};
use ocrloop_median::{
    DataSource, ErrorLog, HealthReport, MedianError, MedianProvider, MedianResult, PluginMedian, PluginMedianClient,
    ReportingPlugin, ReportingPluginConfig, ReportingPluginFactory, ReportingPluginInfo, Service,
};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::LifecycleError;
use crate::service::PluginService;
use crate::subprocess::SubprocessTransport;
use crate::transport::PluginTransport;

impl From<LifecycleError> for MedianError {
    fn from(err: LifecycleError) -> Self {
        MedianError::implementation(err.to_string())
    }
}

/// The four dependencies a median factory is built from
#[derive(Clone)]
pub struct MedianDependencies {
    pub provider: Arc<dyn MedianProvider>,
    pub data_source: Arc<dyn DataSource>,
    pub juels_per_fee_coin_data_source: Arc<dyn DataSource>,
    pub error_log: Arc<dyn ErrorLog>,
}

/// A reporting plugin factory backed by a median plugin subprocess
///
/// The plugin is launched by [`Service::start`]. The factory is built on
/// first use, once the plugin is ready, and every call waits for that
/// unless the service's stop signal fires first.
pub struct MedianService {
    plugin: PluginService,
    deps: MedianDependencies,
    factory: OnceCell<Arc<dyn ReportingPluginFactory>>,
}

impl MedianService {
    /// Run the median plugin from a fresh `command()` per launch
    pub fn new<F>(command: F, deps: MedianDependencies, config: &LoopConfig, stop: CancellationToken) -> Self
    where
        F: Fn() -> Command + Send + Sync + 'static,
    {
        let transport = SubprocessTransport::new(PLUGIN_NAME, command, config);
        Self::with_transport(transport, deps, &config.plugin, stop)
    }

    pub fn with_transport<T>(transport: T, deps: MedianDependencies, config: &PluginConfig, stop: CancellationToken) -> Self
    where
        T: PluginTransport + 'static,
    {
        Self {
            plugin: PluginService::new(PLUGIN_NAME, &[plugin_median::INTERFACE], transport, config, stop),
            deps,
            factory: OnceCell::new(),
        }
    }

    pub fn plugin(&self) -> &PluginService {
        &self.plugin
    }

    async fn factory(&self) -> MedianResult<&Arc<dyn ReportingPluginFactory>> {
        self.factory
            .get_or_try_init(|| async {
                let plugin = self.plugin.wait(&self.plugin.stop_token()).await?;
                let client = PluginMedianClient::new(plugin.broker.with_name("MedianService"), plugin.conn);
                let factory = client
                    .new_median_factory(
                        self.deps.provider.clone(),
                        self.deps.data_source.clone(),
                        self.deps.juels_per_fee_coin_data_source.clone(),
                        self.deps.error_log.clone(),
                    )
                    .await?;
                info!(plugin = PLUGIN_NAME, "median factory built");
                Ok::<_, MedianError>(factory)
            })
            .await
    }
}

#[async_trait]
impl Service for MedianService {
    async fn name(&self) -> MedianResult<String> {
        Ok("MedianService".to_string())
    }

    async fn start(&self) -> MedianResult<()> {
        self.plugin.start();
        Ok(())
    }

    async fn close(&self) -> MedianResult<()> {
        let closed = match self.factory.get() {
            Some(factory) => factory.close().await,
            None => Ok(()),
        };
        if let Err(e) = &closed {
            warn!(plugin = PLUGIN_NAME, error = %e, "failed to close median factory");
        }

        self.plugin.stop();
        self.plugin.stopped().await;
        closed
    }

    async fn ready(&self) -> MedianResult<()> {
        let state = self.plugin.state();
        if !state.is_ready() {
            return Err(MedianError::implementation(format!("median plugin is {}", state)));
        }
        match self.factory.get() {
            Some(factory) => factory.ready().await,
            None => Ok(()),
        }
    }

    async fn health_report(&self) -> MedianResult<HealthReport> {
        let mut report = match self.factory.get() {
            Some(factory) => factory.health_report().await.unwrap_or_else(|e| {
                HealthReport::from([("ReportingPluginFactory".to_string(), Some(e.to_string()))])
            }),
            None => HealthReport::new(),
        };
        report.insert(
            "MedianService".to_string(),
            self.ready().await.err().map(|e| e.to_string()),
        );
        Ok(report)
    }
}

#[async_trait]
impl ReportingPluginFactory for MedianService {
    async fn new_reporting_plugin(
        &self,
        config: ReportingPluginConfig,
    ) -> MedianResult<(Arc<dyn ReportingPlugin>, ReportingPluginInfo)> {
        self.factory().await?.new_reporting_plugin(config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serve::PluginSet;
    use crate::transport::InProcessTransport;
    use ocrloop_config::BrokerConfig;
    use ocrloop_median::testing::{digest, StaticDataSource, StaticErrorLog, StaticPluginMedian, StaticProvider};
    use ocrloop_median::ReportTimestamp;
    use std::time::Duration;

    fn deps() -> MedianDependencies {
        MedianDependencies {
            provider: Arc::new(StaticProvider::default()),
            data_source: Arc::new(StaticDataSource::new(11)),
            juels_per_fee_coin_data_source: Arc::new(StaticDataSource::new(2)),
            error_log: Arc::new(StaticErrorLog::default()),
        }
    }

    fn service(inner: StaticPluginMedian, stop: CancellationToken) -> MedianService {
        let plugins = PluginSet::new().with_median(Arc::new(inner));
        let transport = InProcessTransport::new(plugins, &BrokerConfig::default());
        MedianService::with_transport(transport, deps(), &PluginConfig::default(), stop)
    }

    fn plugin_config() -> ReportingPluginConfig {
        ReportingPluginConfig {
            config_digest: digest(2),
            oracle_id: 1,
            n: 7,
            f: 2,
            onchain_config: Vec::new(),
            offchain_config: Vec::new(),
            estimated_round_interval: Duration::from_secs(1),
            max_duration_query: Duration::from_secs(1),
            max_duration_observation: Duration::from_secs(1),
            max_duration_report: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_new_reporting_plugin_waits_for_plugin() {
        let service = service(StaticPluginMedian::default(), CancellationToken::new());
        assert!(service.ready().await.is_err());

        service.start().await.unwrap();
        let (plugin, info) = service.new_reporting_plugin(plugin_config()).await.unwrap();
        assert_eq!(info.limits.max_report_length, 7 * 69);
        service.ready().await.unwrap();

        let ts = ReportTimestamp {
            config_digest: digest(2),
            epoch: 1,
            round: 1,
        };
        let observation = plugin.observation(ts, &[]).await.unwrap();
        assert_eq!(observation.len(), 32);

        let health = service.health_report().await.unwrap();
        assert_eq!(health.get("MedianService"), Some(&None));
        assert_eq!(health.get("StaticMedianFactory"), Some(&None));

        plugin.close().await.unwrap();
        service.close().await.unwrap();
        assert!(service.plugin().state().is_stopped());
    }

    #[tokio::test]
    async fn test_construction_failure_surfaces() {
        let service = service(StaticPluginMedian::failing("feed offline"), CancellationToken::new());
        service.start().await.unwrap();

        let err = service.new_reporting_plugin(plugin_config()).await.err().unwrap();
        assert!(err.to_string().contains("feed offline"), "{err}");
        service.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_signal_fails_waiting_calls() {
        let stop = CancellationToken::new();
        let service = service(StaticPluginMedian::default(), stop.clone());

        // never started, so only the stop signal can end the wait
        let pending = {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                stop.cancel();
            })
        };
        let err = service.new_reporting_plugin(plugin_config()).await.err().unwrap();
        assert!(err.to_string().contains("stopped"), "{err}");
        pending.await.unwrap();
    }
}
