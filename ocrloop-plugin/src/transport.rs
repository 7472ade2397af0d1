//! How the host reaches a plugin
//!
//! A [`PluginTransport`] launches a plugin, connects a broker to it,
//! confirms the plugin is answering and dispenses a named implementation.
//! [`crate::SubprocessTransport`] does this over a child's stdio;
//! [`InProcessTransport`] runs the plugin side on an in-memory pair.

use async_trait::async_trait;
use ocrloop_broker::{Broker, ClientConn};
use ocrloop_config::BrokerConfig;
use ocrloop_ipc::{in_memory_pair, IPC_PROTOCOL_VERSION};
use ocrloop_logging::ScopedName;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::serve::{serve_connection, PluginSet};

/// A plugin implementation obtained from the counterpart
#[derive(Debug, Clone)]
pub struct DispensedPlugin {
    pub name: String,
    /// Interfaces the plugin endpoint serves
    pub interfaces: Vec<String>,
    /// Host broker on the plugin's base connection
    pub broker: Broker,
    /// Dialed handle to the plugin endpoint
    pub conn: ClientConn,
}

impl DispensedPlugin {
    /// Expected interfaces this plugin does not serve
    pub fn missing<'a>(&self, expected: &'a [String]) -> Vec<&'a str> {
        expected
            .iter()
            .filter(|interface| !self.interfaces.contains(interface))
            .map(String::as_str)
            .collect()
    }
}

#[async_trait]
pub trait PluginTransport: Send + Sync {
    /// Launch the plugin and connect a broker bound to `stop`
    async fn start(&mut self, stop: CancellationToken) -> LifecycleResult<()>;

    /// Round trip to the plugin's control service
    async fn confirm_ready(&self) -> LifecycleResult<()>;

    async fn dispense(&self, name: &str) -> LifecycleResult<DispensedPlugin>;

    /// Disconnect and release whatever `start` acquired
    async fn stop(&mut self);
}

pub(crate) async fn confirm_broker_ready(broker: Option<&Broker>, name: &str) -> LifecycleResult<()> {
    let broker = broker.ok_or_else(|| LifecycleError::handshake_failed(name, "transport is not started"))?;
    let version = broker
        .ping()
        .await
        .map_err(|e| LifecycleError::handshake_failed(name, e))?;
    if version != IPC_PROTOCOL_VERSION {
        return Err(LifecycleError::handshake_failed(
            name,
            format!("plugin speaks protocol version {}, expected {}", version, IPC_PROTOCOL_VERSION),
        ));
    }
    debug!(plugin = name, version, "handshake complete");
    Ok(())
}

pub(crate) async fn dispense_from(broker: Option<&Broker>, name: &str) -> LifecycleResult<DispensedPlugin> {
    let broker = broker.ok_or_else(|| LifecycleError::dispense_failed(name, "transport is not started"))?;
    let dispensed = broker
        .dispense(name)
        .await
        .map_err(|e| LifecycleError::dispense_failed(name, e))?;
    let conn = broker
        .dial(name, dispensed.id)
        .await
        .map_err(|e| LifecycleError::dispense_failed(name, e))?;

    Ok(DispensedPlugin {
        name: name.to_string(),
        interfaces: dispensed.interfaces,
        broker: broker.clone(),
        conn,
    })
}

/// Serves a [`PluginSet`] from a task in this process
pub struct InProcessTransport {
    plugins: PluginSet,
    config: BrokerConfig,
    broker: Option<Broker>,
    plugin_stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl InProcessTransport {
    pub fn new(plugins: PluginSet, config: &BrokerConfig) -> Self {
        Self {
            plugins,
            config: config.clone(),
            broker: None,
            plugin_stop: CancellationToken::new(),
            task: None,
        }
    }

    /// Stop signal of the plugin side
    pub fn plugin_stop_token(&self) -> CancellationToken {
        self.plugin_stop.clone()
    }
}

#[async_trait]
impl PluginTransport for InProcessTransport {
    async fn start(&mut self, stop: CancellationToken) -> LifecycleResult<()> {
        if self.broker.is_some() {
            return Err(LifecycleError::start_failed("in-process", "already started"));
        }

        let ((host_reader, host_writer), (plugin_reader, plugin_writer)) = in_memory_pair(self.config.max_frame_bytes);

        let plugins = self.plugins.clone();
        let config = self.config.clone();
        let plugin_stop = self.plugin_stop.clone();
        self.task = Some(tokio::spawn(async move {
            if let Err(e) = serve_connection(plugin_reader, plugin_writer, plugins, &config, plugin_stop).await {
                warn!(error = %e, "in-process plugin host failed");
            }
        }));

        self.broker = Some(Broker::new(
            host_reader,
            host_writer,
            &self.config,
            stop,
            ScopedName::root("host"),
        ));
        Ok(())
    }

    async fn confirm_ready(&self) -> LifecycleResult<()> {
        confirm_broker_ready(self.broker.as_ref(), "in-process").await
    }

    async fn dispense(&self, name: &str) -> LifecycleResult<DispensedPlugin> {
        dispense_from(self.broker.as_ref(), name).await
    }

    async fn stop(&mut self) {
        if let Some(broker) = self.broker.take() {
            broker.close();
        }
        self.plugin_stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "in-process plugin task panicked");
            }
        }
    }
}
