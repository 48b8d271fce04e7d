//! Structured logging setup.
//!
//! The library only emits `tracing` events; the binary decides where they go.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding a filter directive that overrides the config.
pub const LOG_ENV: &str = "JOBSUB_LOG";

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Pick the filter directive: `$JOBSUB_LOG`, else the configured level.
pub fn filter_directive(configured: &str) -> String {
    match std::env::var(LOG_ENV) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => configured.to_string(),
    }
}

/// Install a stderr subscriber. Later calls are no-ops.
pub fn init(configured_level: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let directive = filter_directive(configured_level);
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .with_filter(filter),
        );

        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already set");
        }
    });
}
