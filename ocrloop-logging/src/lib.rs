//! Structured logging infrastructure for ocrloop
//!
//! Hosts log to stdout; plugin processes log to stderr because their stdout
//! carries the broker's frames. Components identify themselves with a
//! [`ScopedName`], a dot-joined hierarchy such as
//! `MedianService.PluginMedianClient`.

pub mod init;
pub mod scoped;

// Re-export main types for convenience
pub use init::{init_logging_from_config, init_plugin_logging, init_simple_tracing};
pub use ocrloop_config::{LogFormat, LogLevel, LoggingConfig};
pub use scoped::ScopedName;
