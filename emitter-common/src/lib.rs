//! Emitter Common Library
//!
//! Shared building blocks for the synthetic telemetry emitter:
//!
//! - [`config`] - Logging configuration and JSON5 config loading
//! - [`clock`] - Wall-clock timestamp helpers
//! - [`error`] - Error types

pub mod clock;
pub mod config;
pub mod error;

// Re-export commonly used types at the crate root
pub use clock::system_time_millis;
pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};

/// Crates whose own diagnostics are capped at `warn`.
///
/// The OpenTelemetry SDK and its transports log through `tracing`; letting
/// them through at `info`/`debug` floods the console on every export.
pub const QUIET_TARGETS: &[&str] = &["opentelemetry", "opentelemetry_sdk", "tonic", "h2", "hyper", "reqwest"];

/// Build the filter used by [`init_tracing`].
///
/// `RUST_LOG` takes precedence over the configured level when it is set.
pub fn build_env_filter(config: &LoggingConfig) -> Result<tracing_subscriber::EnvFilter> {
    use tracing_subscriber::EnvFilter;

    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    for target in QUIET_TARGETS {
        let directive = format!("{}=warn", target)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid log directive for {}: {}", target, e)))?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// # Example
///
/// ```ignore
/// use emitter_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*};

    let filter = build_env_filter(config)?;

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
