//! Median reporting plugin protocol
//!
//! Every interface a median plugin touches has a client (used by the side
//! that dialed it) and a server (registered by the side that owns the
//! implementation). [`PluginMedianClient`] and [`PluginMedianServer`] wire
//! them together into a reporting plugin factory across the plugin boundary.

pub mod contract_transmitter;
pub mod data_source;
pub mod error;
pub mod error_log;
pub mod median_contract;
pub mod onchain_config;
pub mod plugin_median;
pub mod provider;
pub mod report_codec;
pub mod reporting_plugin;
pub mod service;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{MedianError, MedianResult};
pub use plugin_median::{NewMedianFactoryRequest, PluginMedianClient, PluginMedianServer, PLUGIN_NAME};
pub use provider::{register_provider, MedianProviderClient};
pub use reporting_plugin::{ReportingPluginClient, ReportingPluginFactoryClient};
pub use traits::{
    ContractTransmitter, DataSource, ErrorLog, MedianContract, MedianProvider, OnchainConfigCodec, PluginMedian,
    ReportCodec, ReportingPlugin, ReportingPluginFactory, Service,
};
pub use types::{
    AttributedObservation, AttributedOnchainSignature, HealthReport, OracleId, ParsedAttributedObservation,
    ReportContext, ReportTimestamp, ReportingPluginConfig, ReportingPluginInfo, ReportingPluginLimits,
    RoundRequested, TransmissionDetails,
};
