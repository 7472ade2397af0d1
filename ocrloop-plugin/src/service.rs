//! Lifecycle of one plugin instance
//!
//! `NotStarted -> Starting -> Ready`, with `Stopped` reachable from every
//! state and never left again. A failed or stopped instance is replaced by
//! building a new [`PluginService`], never by restarting this one.

use std::fmt;
use std::sync::Arc;

use ocrloop_config::PluginConfig;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::transport::{DispensedPlugin, PluginTransport};

#[derive(Debug, Clone)]
pub enum PluginState {
    NotStarted,
    Starting,
    Ready(DispensedPlugin),
    /// Carries the failure that stopped the instance, if it did not stop on request
    Stopped(Option<LifecycleError>),
}

impl PluginState {
    pub fn is_ready(&self) -> bool {
        matches!(self, PluginState::Ready(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PluginState::Stopped(_))
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::NotStarted => write!(f, "not started"),
            PluginState::Starting => write!(f, "starting"),
            PluginState::Ready(_) => write!(f, "ready"),
            PluginState::Stopped(None) => write!(f, "stopped"),
            PluginState::Stopped(Some(e)) => write!(f, "stopped: {}", e),
        }
    }
}

struct Inner {
    name: String,
    expected: Vec<String>,
    config: PluginConfig,
    stop: CancellationToken,
    /// Fires once the transport has been stopped
    done: CancellationToken,
    state: watch::Sender<PluginState>,
    transport: Mutex<Option<Box<dyn PluginTransport>>>,
}

/// Starts a plugin in the background and hands out the dispensed implementation
#[derive(Clone)]
pub struct PluginService {
    inner: Arc<Inner>,
}

impl PluginService {
    /// Create an instance for plugin `name`
    ///
    /// `expected` lists the interfaces the dispensed endpoint must serve.
    /// Firing `stop` stops the instance and cancels every call on its broker.
    pub fn new<T>(
        name: impl Into<String>,
        expected: &[&str],
        transport: T,
        config: &PluginConfig,
        stop: CancellationToken,
    ) -> Self
    where
        T: PluginTransport + 'static,
    {
        let (state, _) = watch::channel(PluginState::NotStarted);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                expected: expected.iter().map(|s| s.to_string()).collect(),
                config: config.clone(),
                stop,
                done: CancellationToken::new(),
                state,
                transport: Mutex::new(Some(Box::new(transport))),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> PluginState {
        self.inner.state.borrow().clone()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.inner.stop.clone()
    }

    /// Launch the plugin in the background
    ///
    /// Returns false if the instance was already started or stopped.
    pub fn start(&self) -> bool {
        let Some(transport) = self.inner.transport.lock().take() else {
            debug!(plugin = %self.inner.name, "plugin already started");
            return false;
        };
        if self.inner.stop.is_cancelled() {
            self.inner.publish(PluginState::Stopped(None));
            self.inner.done.cancel();
            return false;
        }

        self.inner.publish(PluginState::Starting);
        tokio::spawn(run(self.inner.clone(), transport));
        true
    }

    /// Wait until the plugin is ready
    ///
    /// Fails as soon as the instance stops, or with
    /// [`LifecycleError::Cancelled`] when `ctx` fires first.
    pub async fn wait(&self, ctx: &CancellationToken) -> LifecycleResult<DispensedPlugin> {
        let mut rx = self.inner.state.subscribe();
        loop {
            if self.inner.stop.is_cancelled() {
                return Err(self.inner.stop_reason());
            }
            let state = rx.borrow_and_update().clone();
            match state {
                PluginState::Ready(plugin) => return Ok(plugin),
                PluginState::Stopped(_) => return Err(self.inner.stop_reason()),
                PluginState::NotStarted | PluginState::Starting => {}
            }

            tokio::select! {
                biased;
                _ = self.inner.stop.cancelled() => return Err(self.inner.stop_reason()),
                _ = ctx.cancelled() => return Err(LifecycleError::cancelled(&self.inner.name)),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(LifecycleError::stopped(&self.inner.name));
                    }
                }
            }
        }
    }

    /// Fire the stop signal
    pub fn stop(&self) {
        self.inner.stop.cancel();
        if self.inner.transport.lock().take().is_some() {
            self.inner.publish(PluginState::Stopped(None));
            self.inner.done.cancel();
        }
    }

    /// Resolves once a stopped instance has released its transport
    pub async fn stopped(&self) {
        self.inner.done.cancelled().await
    }
}

impl fmt::Debug for PluginService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginService")
            .field("name", &self.inner.name)
            .field("state", &self.state().to_string())
            .finish()
    }
}

impl Inner {
    /// Move to `next` unless already stopped
    fn publish(&self, next: PluginState) {
        self.state.send_if_modified(|state| {
            if state.is_stopped() {
                return false;
            }
            *state = next;
            true
        });
    }

    fn stop_reason(&self) -> LifecycleError {
        match &*self.state.borrow() {
            PluginState::Stopped(Some(e)) => e.clone(),
            _ => LifecycleError::stopped(&self.name),
        }
    }

    async fn launch(&self, transport: &mut dyn PluginTransport) -> LifecycleResult<DispensedPlugin> {
        transport.start(self.stop.child_token()).await?;

        let timeout = self.config.handshake_timeout;
        tokio::time::timeout(timeout, transport.confirm_ready())
            .await
            .map_err(|_| LifecycleError::HandshakeTimeout {
                name: self.name.clone(),
                timeout,
            })??;

        let plugin = tokio::time::timeout(self.config.dispense_timeout, transport.dispense(&self.name))
            .await
            .map_err(|_| {
                LifecycleError::dispense_failed(
                    &self.name,
                    format!("no reply within {:?}", self.config.dispense_timeout),
                )
            })??;

        let missing = plugin.missing(&self.expected);
        if !missing.is_empty() {
            plugin.conn.close();
            return Err(LifecycleError::TypeMismatch {
                name: self.name.clone(),
                missing: missing.into_iter().map(String::from).collect(),
            });
        }
        Ok(plugin)
    }
}

async fn run(inner: Arc<Inner>, mut transport: Box<dyn PluginTransport>) {
    let launched = tokio::select! {
        biased;
        _ = inner.stop.cancelled() => None,
        result = inner.launch(transport.as_mut()) => Some(result),
    };

    match launched {
        Some(Ok(plugin)) => {
            let broker = plugin.broker.clone();
            info!(plugin = %inner.name, interfaces = ?plugin.interfaces, "plugin ready");
            inner.publish(PluginState::Ready(plugin));

            tokio::select! {
                biased;
                _ = inner.stop.cancelled() => inner.publish(PluginState::Stopped(None)),
                _ = broker.closed() => {
                    warn!(plugin = %inner.name, "plugin connection closed");
                    inner.publish(PluginState::Stopped(Some(LifecycleError::ConnectionLost {
                        name: inner.name.clone(),
                    })));
                }
            }
        }
        Some(Err(e)) => {
            error!(plugin = %inner.name, error = %e, "plugin failed to start");
            inner.publish(PluginState::Stopped(Some(e)));
        }
        None => inner.publish(PluginState::Stopped(None)),
    }

    transport.stop().await;
    debug!(plugin = %inner.name, "plugin transport released");
    inner.done.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serve::PluginSet;
    use crate::transport::InProcessTransport;
    use async_trait::async_trait;
    use ocrloop_broker::BrokerError;
    use ocrloop_config::BrokerConfig;
    use ocrloop_median::plugin_median;
    use ocrloop_median::testing::StaticPluginMedian;
    use std::time::Duration;

    fn median_transport() -> InProcessTransport {
        let plugins = PluginSet::new().with_median(Arc::new(StaticPluginMedian::default()));
        InProcessTransport::new(plugins, &BrokerConfig::default())
    }

    /// Starts but never answers the handshake
    struct SilentTransport;

    #[async_trait]
    impl PluginTransport for SilentTransport {
        async fn start(&mut self, _stop: CancellationToken) -> LifecycleResult<()> {
            Ok(())
        }

        async fn confirm_ready(&self) -> LifecycleResult<()> {
            std::future::pending().await
        }

        async fn dispense(&self, name: &str) -> LifecycleResult<DispensedPlugin> {
            Err(LifecycleError::dispense_failed(name, "unreachable"))
        }

        async fn stop(&mut self) {}
    }

    #[tokio::test]
    async fn test_ready_after_start() {
        let service = PluginService::new(
            plugin_median::PLUGIN_NAME,
            &[plugin_median::INTERFACE],
            median_transport(),
            &PluginConfig::default(),
            CancellationToken::new(),
        );
        assert!(matches!(service.state(), PluginState::NotStarted));

        assert!(service.start());
        assert!(!service.start());

        let plugin = service.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(plugin.name, "median");
        assert_eq!(plugin.interfaces, vec![plugin_median::INTERFACE.to_string()]);
        assert!(service.state().is_ready());
        assert_eq!(plugin.broker.ping().await.unwrap(), ocrloop_ipc::IPC_PROTOCOL_VERSION);

        service.stop();
        service.stopped().await;
    }

    #[tokio::test]
    async fn test_stop_is_absorbing_and_cancels_calls() {
        let service = PluginService::new(
            plugin_median::PLUGIN_NAME,
            &[plugin_median::INTERFACE],
            median_transport(),
            &PluginConfig::default(),
            CancellationToken::new(),
        );
        service.start();
        let plugin = service.wait(&CancellationToken::new()).await.unwrap();

        service.stop();
        service.stopped().await;
        assert!(matches!(service.state(), PluginState::Stopped(None)));
        assert!(matches!(
            service.wait(&CancellationToken::new()).await,
            Err(LifecycleError::Stopped { .. })
        ));

        let err = plugin.broker.ping().await.unwrap_err();
        assert!(err.is_cancelled(), "{err}");
        assert!(matches!(err, BrokerError::Ipc(_)));
        assert!(!service.start());
        assert!(service.state().is_stopped());
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let service = PluginService::new(
            plugin_median::PLUGIN_NAME,
            &[plugin_median::INTERFACE, "ReportingPluginFactory"],
            median_transport(),
            &PluginConfig::default(),
            CancellationToken::new(),
        );
        service.start();

        let err = service.wait(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err,
            LifecycleError::TypeMismatch {
                name: "median".to_string(),
                missing: vec!["ReportingPluginFactory".to_string()],
            }
        );
        assert!(matches!(service.state(), PluginState::Stopped(Some(_))));
        service.stopped().await;
    }

    #[tokio::test]
    async fn test_unknown_plugin_fails_dispense() {
        let service = PluginService::new(
            "mercury",
            &[],
            median_transport(),
            &PluginConfig::default(),
            CancellationToken::new(),
        );
        service.start();

        let err = service.wait(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::DispenseFailed { ref name, .. } if name == "mercury"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let config = PluginConfig {
            handshake_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let service = PluginService::new("median", &[], SilentTransport, &config, CancellationToken::new());
        service.start();

        let err = service.wait(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err,
            LifecycleError::HandshakeTimeout {
                name: "median".to_string(),
                timeout: Duration::from_millis(50),
            }
        );
    }

    #[tokio::test]
    async fn test_wait_cancelled_by_caller() {
        let service = PluginService::new(
            "median",
            &[],
            SilentTransport,
            &PluginConfig::default(),
            CancellationToken::new(),
        );

        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = service.wait(&ctx).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(service.state(), PluginState::NotStarted));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let stop = CancellationToken::new();
        let service = PluginService::new("median", &[], SilentTransport, &PluginConfig::default(), stop.clone());

        stop.cancel();
        assert!(!service.start());
        assert!(matches!(service.state(), PluginState::Stopped(None)));
        service.stopped().await;
    }

    #[tokio::test]
    async fn test_shared_stop_signal_stops_starting_plugin() {
        let stop = CancellationToken::new();
        let service = PluginService::new("median", &[], SilentTransport, &PluginConfig::default(), stop.clone());
        service.start();
        assert!(matches!(service.state(), PluginState::Starting));

        let waiter = {
            let service = service.clone();
            tokio::spawn(async move { service.wait(&CancellationToken::new()).await })
        };
        stop.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(LifecycleError::Stopped { .. })));
        service.stopped().await;
        assert!(service.state().is_stopped());
    }
}
