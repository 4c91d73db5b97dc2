use homeboard_domain::{HomeboardError, LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `logging.level`. Output is human-readable or one JSON
/// object per line depending on `logging.format`. Fails if a subscriber is
/// already installed.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()?,
    }
    Ok(())
}

/// Convert a `HomeboardError` into a stable label suitable for logging.
#[inline]
pub fn error_label(error: &HomeboardError) -> &'static str {
    match error {
        HomeboardError::Database(_) => "database",
        HomeboardError::Config(_) => "config",
        HomeboardError::Network(_) => "network",
        HomeboardError::Auth(_) => "auth",
        HomeboardError::NotFound(_) => "not_found",
        HomeboardError::InvalidInput(_) => "invalid_input",
        HomeboardError::Internal(_) => "internal",
    }
}
