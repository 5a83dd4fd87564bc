//! Logging initialization for the demo binary.
//!
//! Logs go to stdout in compact form. The level defaults to `info` and can
//! be raised through `RUST_LOG` or `UNISCAN_LOG_LEVEL`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system.
///
/// # Errors
///
/// Returns an error if the env filter cannot be parsed.
pub fn init() -> anyhow::Result<()> {
    let log_level = std::env::var("UNISCAN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();

    Ok(())
}
