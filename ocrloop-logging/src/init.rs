use anyhow::Result;
use ocrloop_config::{LogFormat, LoggingConfig};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Initialize logging from configuration, writing to stdout
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<()> {
    init_with_writer(config, std::io::stdout)
}

/// Initialize logging for a plugin process
///
/// Output goes to stderr so that stdout stays reserved for broker frames.
pub fn init_plugin_logging(config: &LoggingConfig) -> Result<()> {
    init_with_writer(config, std::io::stderr)
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = build_filter(log_level);

    // Use try_init to avoid panic if global subscriber already set
    if tracing_subscriber::fmt().with_env_filter(env_filter).try_init().is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

fn init_with_writer<W>(config: &LoggingConfig, writer: W) -> Result<()>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let env_filter = build_filter(&config.level.to_string());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
