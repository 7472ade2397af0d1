//! The median provider bundle
//!
//! A provider is served as one endpoint carrying five interfaces: the
//! generic `Service` plus contract transmitter, report codec, median
//! contract and on-chain config codec.

use std::sync::Arc;

use async_trait::async_trait;
use ocrloop_broker::{Backing, ClientConn, Server};

use crate::contract_transmitter::{self, ContractTransmitterClient, ContractTransmitterServer};
use crate::error::MedianResult;
use crate::median_contract::{self, MedianContractClient, MedianContractServer};
use crate::onchain_config::{self, OnchainConfigCodecClient, OnchainConfigCodecServer};
use crate::report_codec::{self, ReportCodecClient, ReportCodecServer};
use crate::service::{self, ServiceClient, ServiceServer};
use crate::traits::{ContractTransmitter, MedianContract, MedianProvider, OnchainConfigCodec, ReportCodec, Service};
use crate::types::HealthReport;

/// Register every provider interface on `server`
pub fn register_provider(server: &mut Server, provider: Arc<dyn MedianProvider>) {
    server
        .register(contract_transmitter::INTERFACE, ContractTransmitterServer::new(provider.contract_transmitter()))
        .register(report_codec::INTERFACE, ReportCodecServer::new(provider.report_codec()))
        .register(median_contract::INTERFACE, MedianContractServer::new(provider.median_contract()))
        .register(onchain_config::INTERFACE, OnchainConfigCodecServer::new(provider.onchain_config_codec()))
        .register(service::INTERFACE, ServiceServer::new(provider));
}

/// A provider reached through a dialed connection
#[derive(Clone)]
pub struct MedianProviderClient {
    conn: ClientConn,
    service: ServiceClient,
    contract_transmitter: Arc<ContractTransmitterClient>,
    report_codec: Arc<ReportCodecClient>,
    median_contract: Arc<MedianContractClient>,
    onchain_config_codec: Arc<OnchainConfigCodecClient>,
}

impl MedianProviderClient {
    pub fn new(conn: ClientConn) -> Self {
        Self {
            service: ServiceClient::new(conn.clone()),
            contract_transmitter: Arc::new(ContractTransmitterClient::new(conn.clone())),
            report_codec: Arc::new(ReportCodecClient::new(conn.clone())),
            median_contract: Arc::new(MedianContractClient::new(conn.clone())),
            onchain_config_codec: Arc::new(OnchainConfigCodecClient::new(conn.clone())),
            conn,
        }
    }

    pub fn connection(&self) -> &ClientConn {
        &self.conn
    }
}

#[async_trait]
impl Service for MedianProviderClient {
    async fn name(&self) -> MedianResult<String> {
        self.service.name().await
    }

    async fn start(&self) -> MedianResult<()> {
        self.service.start().await
    }

    async fn close(&self) -> MedianResult<()> {
        self.service.close().await
    }

    async fn ready(&self) -> MedianResult<()> {
        self.service.ready().await
    }

    async fn health_report(&self) -> MedianResult<HealthReport> {
        self.service.health_report().await
    }
}

impl MedianProvider for MedianProviderClient {
    fn contract_transmitter(&self) -> Arc<dyn ContractTransmitter> {
        self.contract_transmitter.clone()
    }

    fn report_codec(&self) -> Arc<dyn ReportCodec> {
        self.report_codec.clone()
    }

    fn median_contract(&self) -> Arc<dyn MedianContract> {
        self.median_contract.clone()
    }

    fn onchain_config_codec(&self) -> Arc<dyn OnchainConfigCodec> {
        self.onchain_config_codec.clone()
    }

    fn backing(&self) -> Backing<'_> {
        Backing::Connected(&self.conn)
    }
}
