//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Install the process-wide tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Safe to call
/// multiple times (subsequent calls are no-ops).
pub fn init(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if settings.json {
        builder.json().with_target(false).try_init()
    } else {
        builder.try_init()
    };
}
