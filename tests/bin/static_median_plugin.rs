//! Median plugin backed by the static fixtures
//!
//! Speaks frames on stdin/stdout and logs to stderr. Configuration comes
//! from `OCRLOOP_*` environment variables.

use std::sync::Arc;

use anyhow::Result;
use ocrloop_config::ConfigLoader;
use ocrloop_median::testing::StaticPluginMedian;
use ocrloop_plugin::{serve_stdio, PluginSet};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::new().from_env()?;
    let plugins = PluginSet::new().with_median(Arc::new(StaticPluginMedian::default()));
    serve_stdio(plugins, &config).await
}
