//! Interfaces implemented by median plugins and their host

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigInt;
use ocrloop_broker::Backing;
use ocrloop_codec::{ConfigDigest, OnchainConfig};

use crate::error::MedianResult;
use crate::types::{
    AttributedObservation, AttributedOnchainSignature, HealthReport, ParsedAttributedObservation, ReportContext,
    ReportTimestamp, ReportingPluginConfig, ReportingPluginInfo, RoundRequested, TransmissionDetails,
};

/// Lifecycle shared by long-lived services
#[async_trait]
pub trait Service: Send + Sync {
    async fn name(&self) -> MedianResult<String>;
    async fn start(&self) -> MedianResult<()>;
    async fn close(&self) -> MedianResult<()>;
    async fn ready(&self) -> MedianResult<()>;
    async fn health_report(&self) -> MedianResult<HealthReport>;
}

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn observe(&self, timestamp: ReportTimestamp) -> MedianResult<BigInt>;
}

#[async_trait]
pub trait ErrorLog: Send + Sync {
    async fn save_error(&self, message: &str) -> MedianResult<()>;
}

#[async_trait]
pub trait ReportCodec: Send + Sync {
    async fn build_report(&self, observations: &[ParsedAttributedObservation]) -> MedianResult<Vec<u8>>;
    async fn median_from_report(&self, report: &[u8]) -> MedianResult<BigInt>;
    async fn max_report_length(&self, n: usize) -> MedianResult<usize>;
}

#[async_trait]
pub trait MedianContract: Send + Sync {
    async fn latest_transmission_details(&self) -> MedianResult<TransmissionDetails>;
    async fn latest_round_requested(&self, lookback: Duration) -> MedianResult<RoundRequested>;
}

#[async_trait]
pub trait OnchainConfigCodec: Send + Sync {
    async fn encode(&self, config: &OnchainConfig) -> MedianResult<Vec<u8>>;
    async fn decode(&self, encoded: &[u8]) -> MedianResult<OnchainConfig>;
}

#[async_trait]
pub trait ContractTransmitter: Send + Sync {
    async fn transmit(
        &self,
        context: &ReportContext,
        report: &[u8],
        signatures: &[AttributedOnchainSignature],
    ) -> MedianResult<()>;
    async fn latest_config_digest_and_epoch(&self) -> MedianResult<(ConfigDigest, u32)>;
    async fn from_account(&self) -> MedianResult<String>;
}

/// Chain-specific bundle a median plugin reports through
pub trait MedianProvider: Service {
    fn contract_transmitter(&self) -> Arc<dyn ContractTransmitter>;
    fn report_codec(&self) -> Arc<dyn ReportCodec>;
    fn median_contract(&self) -> Arc<dyn MedianContract>;
    fn onchain_config_codec(&self) -> Arc<dyn OnchainConfigCodec>;

    /// How this provider is backed; dialed providers report their connection
    fn backing(&self) -> Backing<'_> {
        Backing::NeedsRegistration
    }
}

/// Entry point a median plugin exposes
#[async_trait]
pub trait PluginMedian: Send + Sync {
    async fn new_median_factory(
        &self,
        provider: Arc<dyn MedianProvider>,
        data_source: Arc<dyn DataSource>,
        juels_per_fee_coin_data_source: Arc<dyn DataSource>,
        error_log: Arc<dyn ErrorLog>,
    ) -> MedianResult<Arc<dyn ReportingPluginFactory>>;
}

#[async_trait]
pub trait ReportingPluginFactory: Service {
    async fn new_reporting_plugin(
        &self,
        config: ReportingPluginConfig,
    ) -> MedianResult<(Arc<dyn ReportingPlugin>, ReportingPluginInfo)>;
}

/// One instance of the reporting protocol's plugin callbacks
#[async_trait]
pub trait ReportingPlugin: Send + Sync {
    async fn query(&self, timestamp: ReportTimestamp) -> MedianResult<Vec<u8>>;
    async fn observation(&self, timestamp: ReportTimestamp, query: &[u8]) -> MedianResult<Vec<u8>>;
    async fn report(
        &self,
        timestamp: ReportTimestamp,
        query: &[u8],
        observations: &[AttributedObservation],
    ) -> MedianResult<(bool, Vec<u8>)>;
    async fn should_accept_finalized_report(&self, timestamp: ReportTimestamp, report: &[u8]) -> MedianResult<bool>;
    async fn should_transmit_accepted_report(&self, timestamp: ReportTimestamp, report: &[u8]) -> MedianResult<bool>;
    async fn close(&self) -> MedianResult<()>;
}
