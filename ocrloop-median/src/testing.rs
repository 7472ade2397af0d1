//! Deterministic implementations of the median interfaces
//!
//! Used by tests on both sides of the plugin boundary and by the static
//! median plugin binary. Every fixture records what it was asked so tests
//! can assert on what crossed the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use num_bigint::BigInt;
use ocrloop_codec::{deserialize_signed, serialize_signed, ConfigDigest, StandardOnchainConfigCodec};
use parking_lot::Mutex;

use crate::error::{MedianError, MedianResult};
use crate::traits::{
    ContractTransmitter, DataSource, ErrorLog, MedianContract, MedianProvider, OnchainConfigCodec, PluginMedian,
    ReportCodec, ReportingPlugin, ReportingPluginFactory, Service,
};
use crate::types::{
    AttributedObservation, AttributedOnchainSignature, HealthReport, ParsedAttributedObservation, ReportContext,
    ReportTimestamp, ReportingPluginConfig, ReportingPluginInfo, ReportingPluginLimits, RoundRequested,
    TransmissionDetails,
};

const WORD: usize = 32;

/// timestamp (4) + observer (1) + value word + juels word
const ENTRY: usize = 4 + 1 + 2 * WORD;

/// A digest filled with `byte`
pub fn digest(byte: u8) -> ConfigDigest {
    ConfigDigest::new([byte; 32])
}

pub struct StaticDataSource {
    value: BigInt,
    observed: Mutex<Vec<ReportTimestamp>>,
}

impl StaticDataSource {
    pub fn new(value: impl Into<BigInt>) -> Self {
        Self {
            value: value.into(),
            observed: Mutex::new(Vec::new()),
        }
    }

    pub fn observed(&self) -> Vec<ReportTimestamp> {
        self.observed.lock().clone()
    }
}

#[async_trait]
impl DataSource for StaticDataSource {
    async fn observe(&self, timestamp: ReportTimestamp) -> MedianResult<BigInt> {
        self.observed.lock().push(timestamp);
        Ok(self.value.clone())
    }
}

#[derive(Default)]
pub struct StaticErrorLog {
    messages: Mutex<Vec<String>>,
}

impl StaticErrorLog {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl ErrorLog for StaticErrorLog {
    async fn save_error(&self, message: &str) -> MedianResult<()> {
        self.messages.lock().push(message.to_string());
        Ok(())
    }
}

/// Fixed-width report layout whose median is the middle value
#[derive(Default)]
pub struct StaticReportCodec {
    builds: Mutex<Vec<Vec<ParsedAttributedObservation>>>,
}

impl StaticReportCodec {
    /// Observation lists received by `build_report`, oldest first
    pub fn builds(&self) -> Vec<Vec<ParsedAttributedObservation>> {
        self.builds.lock().clone()
    }
}

#[async_trait]
impl ReportCodec for StaticReportCodec {
    async fn build_report(&self, observations: &[ParsedAttributedObservation]) -> MedianResult<Vec<u8>> {
        self.builds.lock().push(observations.to_vec());

        let mut report = Vec::with_capacity(observations.len() * ENTRY);
        for obs in observations {
            report.extend_from_slice(&obs.timestamp.to_be_bytes());
            report.push(obs.observer);
            report.extend(serialize_signed(WORD, &obs.value)?);
            report.extend(serialize_signed(WORD, &obs.juels_per_fee_coin)?);
        }
        Ok(report)
    }

    async fn median_from_report(&self, report: &[u8]) -> MedianResult<BigInt> {
        if report.is_empty() || report.len() % ENTRY != 0 {
            return Err(MedianError::implementation(format!(
                "report length {} is not a positive multiple of {}",
                report.len(),
                ENTRY
            )));
        }

        let mut values = report
            .chunks(ENTRY)
            .map(|entry| deserialize_signed(WORD, &entry[5..5 + WORD]))
            .collect::<Result<Vec<_>, _>>()?;
        values.sort();
        Ok(values.swap_remove(values.len() / 2))
    }

    async fn max_report_length(&self, n: usize) -> MedianResult<usize> {
        Ok(n * ENTRY)
    }
}

pub struct StaticMedianContract {
    pub details: TransmissionDetails,
    pub round_requested: RoundRequested,
    lookbacks: Mutex<Vec<Duration>>,
}

impl StaticMedianContract {
    pub fn lookbacks(&self) -> Vec<Duration> {
        self.lookbacks.lock().clone()
    }
}

impl Default for StaticMedianContract {
    fn default() -> Self {
        Self {
            details: TransmissionDetails {
                config_digest: digest(1),
                epoch: 7,
                round: 3,
                latest_answer: BigInt::from(42),
                latest_timestamp: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default(),
            },
            round_requested: RoundRequested {
                config_digest: digest(1),
                epoch: 7,
                round: 4,
            },
            lookbacks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MedianContract for StaticMedianContract {
    async fn latest_transmission_details(&self) -> MedianResult<TransmissionDetails> {
        Ok(self.details.clone())
    }

    async fn latest_round_requested(&self, lookback: Duration) -> MedianResult<RoundRequested> {
        self.lookbacks.lock().push(lookback);
        Ok(self.round_requested)
    }
}

pub struct StaticContractTransmitter {
    account: String,
    transmissions: Mutex<Vec<(ReportContext, Vec<u8>, Vec<AttributedOnchainSignature>)>>,
}

impl StaticContractTransmitter {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            transmissions: Mutex::new(Vec::new()),
        }
    }

    pub fn transmissions(&self) -> Vec<(ReportContext, Vec<u8>, Vec<AttributedOnchainSignature>)> {
        self.transmissions.lock().clone()
    }
}

#[async_trait]
impl ContractTransmitter for StaticContractTransmitter {
    async fn transmit(
        &self,
        context: &ReportContext,
        report: &[u8],
        signatures: &[AttributedOnchainSignature],
    ) -> MedianResult<()> {
        self.transmissions
            .lock()
            .push((*context, report.to_vec(), signatures.to_vec()));
        Ok(())
    }

    async fn latest_config_digest_and_epoch(&self) -> MedianResult<(ConfigDigest, u32)> {
        Ok((digest(1), 7))
    }

    async fn from_account(&self) -> MedianResult<String> {
        Ok(self.account.clone())
    }
}

/// Provider built from the static fixtures
pub struct StaticProvider {
    pub transmitter: Arc<StaticContractTransmitter>,
    pub codec: Arc<StaticReportCodec>,
    pub contract: Arc<StaticMedianContract>,
    closed: AtomicBool,
}

impl Default for StaticProvider {
    fn default() -> Self {
        Self {
            transmitter: Arc::new(StaticContractTransmitter::new("0xstatic")),
            codec: Arc::new(StaticReportCodec::default()),
            contract: Arc::new(StaticMedianContract::default()),
            closed: AtomicBool::new(false),
        }
    }
}

impl StaticProvider {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Service for StaticProvider {
    async fn name(&self) -> MedianResult<String> {
        Ok("StaticProvider".to_string())
    }

    async fn start(&self) -> MedianResult<()> {
        Ok(())
    }

    async fn close(&self) -> MedianResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn ready(&self) -> MedianResult<()> {
        if self.is_closed() {
            return Err(MedianError::implementation("provider is closed"));
        }
        Ok(())
    }

    async fn health_report(&self) -> MedianResult<HealthReport> {
        Ok(HealthReport::from([("StaticProvider".to_string(), None)]))
    }
}

impl MedianProvider for StaticProvider {
    fn contract_transmitter(&self) -> Arc<dyn ContractTransmitter> {
        self.transmitter.clone()
    }

    fn report_codec(&self) -> Arc<dyn ReportCodec> {
        self.codec.clone()
    }

    fn median_contract(&self) -> Arc<dyn MedianContract> {
        self.contract.clone()
    }

    fn onchain_config_codec(&self) -> Arc<dyn OnchainConfigCodec> {
        Arc::new(StandardOnchainConfigCodec)
    }
}

/// Plugin entry point that builds a [`StaticFactory`]
#[derive(Default)]
pub struct StaticPluginMedian {
    fail_with: Option<String>,
}

impl StaticPluginMedian {
    /// A plugin whose factory construction always fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
        }
    }
}

#[async_trait]
impl PluginMedian for StaticPluginMedian {
    async fn new_median_factory(
        &self,
        provider: Arc<dyn MedianProvider>,
        data_source: Arc<dyn DataSource>,
        juels_per_fee_coin_data_source: Arc<dyn DataSource>,
        error_log: Arc<dyn ErrorLog>,
    ) -> MedianResult<Arc<dyn ReportingPluginFactory>> {
        if let Some(message) = &self.fail_with {
            return Err(MedianError::implementation(message.clone()));
        }
        Ok(Arc::new(StaticFactory {
            deps: Arc::new(FactoryDeps {
                provider,
                data_source,
                juels_per_fee_coin_data_source,
                error_log,
            }),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FactoryDeps {
    provider: Arc<dyn MedianProvider>,
    data_source: Arc<dyn DataSource>,
    juels_per_fee_coin_data_source: Arc<dyn DataSource>,
    error_log: Arc<dyn ErrorLog>,
}

pub struct StaticFactory {
    deps: Arc<FactoryDeps>,
    closed: AtomicBool,
}

#[async_trait]
impl Service for StaticFactory {
    async fn name(&self) -> MedianResult<String> {
        Ok("StaticMedianFactory".to_string())
    }

    async fn start(&self) -> MedianResult<()> {
        Ok(())
    }

    async fn close(&self) -> MedianResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn ready(&self) -> MedianResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MedianError::implementation("factory is closed"));
        }
        Ok(())
    }

    async fn health_report(&self) -> MedianResult<HealthReport> {
        let healthy = self.ready().await.err().map(|e| e.to_string());
        Ok(HealthReport::from([("StaticMedianFactory".to_string(), healthy)]))
    }
}

#[async_trait]
impl ReportingPluginFactory for StaticFactory {
    async fn new_reporting_plugin(
        &self,
        config: ReportingPluginConfig,
    ) -> MedianResult<(Arc<dyn ReportingPlugin>, ReportingPluginInfo)> {
        let n = usize::try_from(config.n).map_err(|e| MedianError::implementation(e.to_string()))?;
        let max_report_length = self.deps.provider.report_codec().max_report_length(n).await?;

        let info = ReportingPluginInfo {
            name: "StaticMedian".to_string(),
            unique_reports: false,
            limits: ReportingPluginLimits {
                max_query_length: 0,
                max_observation_length: WORD as u64,
                max_report_length: max_report_length as u64,
            },
        };
        let plugin = StaticReportingPlugin {
            deps: self.deps.clone(),
        };
        Ok((Arc::new(plugin), info))
    }
}

/// Observes its data source and reports through the provider's codec
struct StaticReportingPlugin {
    deps: Arc<FactoryDeps>,
}

#[async_trait]
impl ReportingPlugin for StaticReportingPlugin {
    async fn query(&self, _timestamp: ReportTimestamp) -> MedianResult<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn observation(&self, timestamp: ReportTimestamp, _query: &[u8]) -> MedianResult<Vec<u8>> {
        let value = self.deps.data_source.observe(timestamp).await?;
        Ok(serialize_signed(WORD, &value)?)
    }

    async fn report(
        &self,
        timestamp: ReportTimestamp,
        _query: &[u8],
        observations: &[AttributedObservation],
    ) -> MedianResult<(bool, Vec<u8>)> {
        let juels = self.deps.juels_per_fee_coin_data_source.observe(timestamp).await?;

        let mut parsed = Vec::with_capacity(observations.len());
        for obs in observations {
            match deserialize_signed(WORD, &obs.observation) {
                Ok(value) => parsed.push(ParsedAttributedObservation {
                    timestamp: timestamp.epoch,
                    value,
                    juels_per_fee_coin: juels.clone(),
                    observer: obs.observer,
                }),
                Err(e) => {
                    self.deps
                        .error_log
                        .save_error(&format!("dropping observation from oracle {}: {}", obs.observer, e))
                        .await?;
                }
            }
        }

        if parsed.is_empty() {
            return Ok((false, Vec::new()));
        }
        let report = self.deps.provider.report_codec().build_report(&parsed).await?;
        Ok((true, report))
    }

    async fn should_accept_finalized_report(&self, _timestamp: ReportTimestamp, report: &[u8]) -> MedianResult<bool> {
        Ok(!report.is_empty())
    }

    async fn should_transmit_accepted_report(&self, _timestamp: ReportTimestamp, report: &[u8]) -> MedianResult<bool> {
        Ok(!report.is_empty())
    }

    async fn close(&self) -> MedianResult<()> {
        Ok(())
    }
}

/// Host and plugin brokers joined by an in-memory transport
#[cfg(test)]
pub(crate) fn broker_pair() -> (ocrloop_broker::Broker, ocrloop_broker::Broker) {
    use ocrloop_broker::Broker;
    use ocrloop_config::BrokerConfig;
    use ocrloop_logging::ScopedName;
    use tokio_util::sync::CancellationToken;

    let config = BrokerConfig::default();
    let ((hr, hw), (pr, pw)) = ocrloop_ipc::in_memory_pair(config.max_frame_bytes);
    let host = Broker::new(hr, hw, &config, CancellationToken::new(), ScopedName::root("host"));
    let plugin = Broker::new(pr, pw, &config, CancellationToken::new(), ScopedName::root("plugin"));
    (host, plugin)
}
