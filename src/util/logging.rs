//! Logging initialization and configuration.

use crate::config::LogFormat;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `level`. An unparsable level falls back
/// to `info`.
///
/// # Arguments
///
/// * `level` - Log level filter (e.g., "info", "debug", "tidelb=trace")
/// * `format` - Log output format (json or pretty)
pub fn init_logging(level: &str, format: &LogFormat) {
    let registry = tracing_subscriber::registry().with(filter_for(level));

    // try_init so a second call (tests, embedding) is not fatal
    let result = match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_current_span(false)).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "logging already initialized");
    }
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
