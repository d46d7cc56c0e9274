//! Quarry common library.
//!
//! Shared pieces used by the exporter service and the backend clients:
//!
//! - [`config`] - Configuration model and JSON5 loading
//! - [`duration`] - Go-style duration strings ("30s", "1h30m")
//! - [`expand`] - `${VAR}` environment expansion
//! - [`error`] - Error types

pub mod config;
pub mod duration;
pub mod error;
pub mod expand;

// Re-export commonly used types at the crate root
pub use config::{
    Config, HttpConfig, HttpRetryConfig, HttpTlsConfig, IotDbConfig, LogFormat, LoggingConfig,
    MetricKind, MetricSource, MetricSpec, MySqlConfig, PrometheusConfig, RedisConfig,
    ScheduleConfig, DEFAULT_CONNECTION,
};
pub use duration::parse_duration;
pub use error::{ConfigError, Result};
pub use expand::expand_env;

/// Initialize tracing with the given configuration.
///
/// The `RUST_LOG` environment variable overrides the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| {
                    ConfigError::validation(format!("failed to initialize tracing: {e}"))
                })?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| {
                    ConfigError::validation(format!("failed to initialize tracing: {e}"))
                })?;
        }
    }

    Ok(())
}
