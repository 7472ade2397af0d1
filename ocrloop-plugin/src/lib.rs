//! Plugin lifecycle for ocrloop
//!
//! The host side launches a plugin through a [`PluginTransport`], waits for
//! it with [`PluginService`] and uses it through typed services such as
//! [`MedianService`]. The plugin side offers its implementations with a
//! [`PluginSet`] served by [`serve_stdio`].

pub mod error;
pub mod median;
pub mod serve;
pub mod service;
pub mod subprocess;
pub mod transport;

pub use error::{LifecycleError, LifecycleResult};
pub use median::{MedianDependencies, MedianService};
pub use serve::{serve_connection, serve_stdio, PluginSet};
pub use service::{PluginService, PluginState};
pub use subprocess::{CommandFactory, SubprocessTransport};
pub use transport::{DispensedPlugin, InProcessTransport, PluginTransport};
