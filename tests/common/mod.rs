//! Shared setup for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ocrloop_broker::{Broker, ClientConn};
use ocrloop_config::BrokerConfig;
use ocrloop_ipc::in_memory_pair;
use ocrloop_logging::ScopedName;
use ocrloop_median::testing::{digest, StaticDataSource, StaticErrorLog, StaticPluginMedian, StaticProvider};
use ocrloop_median::{PluginMedianClient, ReportTimestamp, ReportingPluginConfig};
use ocrloop_plugin::{MedianDependencies, PluginSet};
use tokio_util::sync::CancellationToken;

/// Two brokers joined in memory, the second serving `plugins`
pub async fn connect(plugins: PluginSet) -> (Broker, Broker) {
    let config = BrokerConfig::default();
    let ((hr, hw), (pr, pw)) = in_memory_pair(config.max_frame_bytes);
    let host = Broker::new(hr, hw, &config, CancellationToken::new(), ScopedName::root("host"));
    let plugin = Broker::new(pr, pw, &config, CancellationToken::new(), ScopedName::root("plugin"));

    plugins.offer(&plugin).await.expect("offer plugins");
    (host, plugin)
}

/// A median plugin on the far side of an in-memory connection
pub async fn median_plugin(inner: StaticPluginMedian) -> (Broker, Broker, PluginMedianClient, ClientConn) {
    let (host, plugin) = connect(PluginSet::new().with_median(Arc::new(inner))).await;
    let dispensed = host.dispense(ocrloop_median::PLUGIN_NAME).await.expect("dispense");
    let conn = host
        .dial(ocrloop_median::PLUGIN_NAME, dispensed.id)
        .await
        .expect("dial");
    (host.clone(), plugin, PluginMedianClient::new(host, conn.clone()), conn)
}

pub struct Fixtures {
    pub provider: Arc<StaticProvider>,
    pub data_source: Arc<StaticDataSource>,
    pub juels: Arc<StaticDataSource>,
    pub error_log: Arc<StaticErrorLog>,
}

impl Fixtures {
    pub fn new(value: i64) -> Self {
        Self {
            provider: Arc::new(StaticProvider::default()),
            data_source: Arc::new(StaticDataSource::new(value)),
            juels: Arc::new(StaticDataSource::new(2)),
            error_log: Arc::new(StaticErrorLog::default()),
        }
    }

    pub fn dependencies(&self) -> MedianDependencies {
        MedianDependencies {
            provider: self.provider.clone(),
            data_source: self.data_source.clone(),
            juels_per_fee_coin_data_source: self.juels.clone(),
            error_log: self.error_log.clone(),
        }
    }
}

pub fn plugin_config(n: u32) -> ReportingPluginConfig {
    ReportingPluginConfig {
        config_digest: digest(1),
        oracle_id: 0,
        n,
        f: 1,
        onchain_config: Vec::new(),
        offchain_config: Vec::new(),
        estimated_round_interval: Duration::from_secs(1),
        max_duration_query: Duration::from_secs(1),
        max_duration_observation: Duration::from_secs(1),
        max_duration_report: Duration::from_secs(1),
    }
}

pub fn timestamp(epoch: u32) -> ReportTimestamp {
    ReportTimestamp {
        config_digest: digest(1),
        epoch,
        round: 1,
    }
}
