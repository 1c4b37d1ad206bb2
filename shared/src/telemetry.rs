use thiserror::Error;
use tracing::info;
use tracing_subscriber::{
    filter::ParseError, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
    EnvFilter,
};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("global subscriber already installed: {0}")]
    Init(#[from] TryInitError),
}

/// Builds the filter for the console subscriber. `RUST_LOG` wins over the
/// configured directive when it is set and parses.
pub fn env_filter(configured: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(configured)?),
    }
}

/// Installs the process-wide console subscriber. Call once from the shell
/// bootstrap; a second call reports `Init`.
pub fn init_logging(configured: &str) -> Result<(), TelemetryError> {
    let filter = env_filter(configured)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    info!(filter = configured, "logging initialized");
    Ok(())
}
