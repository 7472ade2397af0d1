//! Plugins running as child processes

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use ocrloop_broker::Broker;
use ocrloop_config::{BrokerConfig, LoopConfig};
use ocrloop_logging::ScopedName;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::transport::{confirm_broker_ready, dispense_from, DispensedPlugin, PluginTransport};

/// Builds the launch command for one start attempt
pub type CommandFactory = Box<dyn Fn() -> Command + Send + Sync>;

/// Launches a plugin binary and speaks frames over its stdin and stdout
///
/// The command factory is called once per [`PluginTransport::start`], so a
/// restarted plugin never reuses a spent `Command`. The child's stderr is
/// inherited and carries the plugin's logs.
pub struct SubprocessTransport {
    name: String,
    command: CommandFactory,
    broker_config: BrokerConfig,
    grace_period: Duration,
    child: Option<Child>,
    broker: Option<Broker>,
}

impl SubprocessTransport {
    pub fn new<F>(name: impl Into<String>, command: F, config: &LoopConfig) -> Self
    where
        F: Fn() -> Command + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            command: Box::new(command),
            broker_config: config.broker.clone(),
            grace_period: config.plugin.stop_grace_period,
            child: None,
            broker: None,
        }
    }

    /// Process id of the running child
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl PluginTransport for SubprocessTransport {
    async fn start(&mut self, stop: CancellationToken) -> LifecycleResult<()> {
        if self.child.is_some() {
            return Err(LifecycleError::start_failed(&self.name, "already started"));
        }

        let mut command = (self.command)();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| LifecycleError::start_failed(&self.name, e))?;
        let pid = child.id();

        let (reader, writer) = ocrloop_ipc::child_process(&mut child, self.broker_config.max_frame_bytes)
            .map_err(|e| LifecycleError::start_failed(&self.name, e))?;
        self.child = Some(child);
        self.broker = Some(Broker::new(
            reader,
            writer,
            &self.broker_config,
            stop,
            ScopedName::root(self.name.clone()),
        ));

        info!(plugin = %self.name, ?pid, "plugin subprocess started");
        Ok(())
    }

    async fn confirm_ready(&self) -> LifecycleResult<()> {
        confirm_broker_ready(self.broker.as_ref(), &self.name).await
    }

    async fn dispense(&self, name: &str) -> LifecycleResult<DispensedPlugin> {
        dispense_from(self.broker.as_ref(), name).await
    }

    async fn stop(&mut self) {
        // Closing the broker closes the child's stdin, which asks it to exit
        if let Some(broker) = self.broker.take() {
            broker.close();
        }

        let Some(mut child) = self.child.take() else {
            return;
        };
        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => debug!(plugin = %self.name, %status, "plugin subprocess exited"),
            Ok(Err(e)) => warn!(plugin = %self.name, error = %e, "failed to wait for plugin subprocess"),
            Err(_) => {
                warn!(plugin = %self.name, grace_period = ?self.grace_period, "plugin did not exit in time, killing");
                if let Err(e) = child.kill().await {
                    warn!(plugin = %self.name, error = %e, "failed to kill plugin subprocess");
                }
            }
        }
    }
}
