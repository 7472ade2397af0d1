//! The plugin side of the base connection
//!
//! A plugin binary builds a [`PluginSet`] and hands it to [`serve_stdio`],
//! which registers every plugin as dispensable and keeps serving until the
//! host closes the connection.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ocrloop_broker::{Broker, BrokerResult, ResourceSet, Server};
use ocrloop_config::{BrokerConfig, LoopConfig};
use ocrloop_ipc::{FrameReader, FrameWriter};
use ocrloop_logging::{init_plugin_logging, ScopedName};
use ocrloop_median::{PluginMedian, PluginMedianServer, PLUGIN_NAME};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type Register = Arc<dyn Fn(&mut Server, Broker) + Send + Sync>;

/// Plugins a process offers, by dispense name
#[derive(Clone, Default)]
pub struct PluginSet {
    plugins: BTreeMap<String, Register>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a plugin whose interfaces `register` installs
    ///
    /// `register` receives a broker scoped to the plugin for registering
    /// the sub-services it creates later.
    pub fn with_plugin<F>(mut self, name: impl Into<String>, register: F) -> Self
    where
        F: Fn(&mut Server, Broker) + Send + Sync + 'static,
    {
        self.plugins.insert(name.into(), Arc::new(register));
        self
    }

    /// Offer a median plugin under its standard name
    pub fn with_median(self, inner: Arc<dyn PluginMedian>) -> Self {
        self.with_plugin(PLUGIN_NAME, move |server, broker| {
            PluginMedianServer::register(server, broker, inner.clone())
        })
    }

    /// Register every plugin on `broker` as dispensable
    ///
    /// Either all plugins are registered or none are.
    pub async fn offer(&self, broker: &Broker) -> BrokerResult<ResourceSet> {
        let mut offered = ResourceSet::new();
        for (name, register) in &self.plugins {
            let scoped = broker.with_name(name);
            match broker.serve_plugin(name, |server| (**register)(server, scoped)).await {
                Ok((id, resource)) => {
                    debug!(plugin = %name, service_id = id, "offering plugin");
                    offered.push(resource);
                }
                Err(e) => {
                    offered.rollback().await;
                    return Err(e);
                }
            }
        }
        Ok(offered)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Serve `plugins` on a frame transport until the connection closes
pub async fn serve_connection<R, W>(
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    plugins: PluginSet,
    config: &BrokerConfig,
    stop: CancellationToken,
) -> BrokerResult<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (broker, gate) = Broker::new_gated(reader, writer, config, stop, ScopedName::root("plugin"));
    let offered = plugins.offer(&broker).await;
    gate.open();
    if let Err(e) = offered {
        broker.close();
        return Err(e);
    }

    info!(logger = %broker.name(), plugins = ?plugins, "serving plugins");
    broker.closed().await;
    debug!(logger = %broker.name(), "plugin connection closed");
    Ok(())
}

/// Serve `plugins` over this process's stdin and stdout
///
/// Logs go to stderr. Returns when the host closes stdin.
pub async fn serve_stdio(plugins: PluginSet, config: &LoopConfig) -> anyhow::Result<()> {
    init_plugin_logging(&config.logging)?;
    let (reader, writer) = ocrloop_ipc::stdio(config.broker.max_frame_bytes);
    serve_connection(reader, writer, plugins, &config.broker, CancellationToken::new()).await?;
    Ok(())
}
