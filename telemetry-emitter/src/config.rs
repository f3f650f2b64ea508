//! Configuration for the synthetic telemetry emitter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use emitter_common::LoggingConfig;

use crate::pipeline::SignalKind;

/// Environment variable overriding the collector endpoint.
pub const COLLECTOR_ENDPOINT_ENV: &str = "OTEL_COLLECTOR_ENDPOINT";

/// Environment variable overriding the emission interval, in milliseconds.
pub const TRACE_INTERVAL_ENV: &str = "TRACE_INTERVAL";

/// Collector endpoint used when neither the config nor the environment sets one.
pub const DEFAULT_COLLECTOR_ENDPOINT: &str = "http://localhost:4317";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] emitter_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete emitter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Collector connection settings.
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Service identity and resource attributes.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Emission cadence.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Optional local mirror of emitted log records.
    #[serde(default)]
    pub log_sink: LogSinkConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// OTLP collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Collector endpoint (e.g., "http://localhost:4317" or "collector:4317").
    /// Falls back to [`DEFAULT_COLLECTOR_ENDPOINT`] when unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Transport security for endpoints given without a scheme.
    #[serde(default)]
    pub tls: TlsMode,

    /// Protocol: "grpc" or "http".
    #[serde(default)]
    pub protocol: OtlpProtocol,

    /// Export timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Metric export interval in seconds.
    #[serde(default = "default_export_interval")]
    pub export_interval_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

fn default_export_interval() -> u64 {
    10
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            tls: TlsMode::default(),
            protocol: OtlpProtocol::default(),
            timeout_secs: default_timeout(),
            export_interval_secs: default_export_interval(),
        }
    }
}

impl CollectorConfig {
    /// Get timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get metric export interval as Duration.
    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_secs)
    }

    /// Resolve the endpoint every pipeline is built against.
    pub fn resolve_endpoint(&self) -> CollectorEndpoint {
        let endpoint = self
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_COLLECTOR_ENDPOINT);

        CollectorEndpoint::new(endpoint, self.tls)
    }
}

/// OTLP protocol selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    /// gRPC protocol (port 4317).
    #[default]
    Grpc,
    /// HTTP/protobuf protocol (port 4318).
    Http,
}

/// Transport security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plaintext (`http://`).
    #[default]
    Insecure,
    /// TLS (`https://`).
    Secure,
}

impl TlsMode {
    fn scheme(&self) -> &'static str {
        match self {
            TlsMode::Insecure => "http",
            TlsMode::Secure => "https",
        }
    }
}

/// A resolved collector endpoint, as handed to each pipeline constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorEndpoint {
    /// Endpoint exactly as configured.
    pub endpoint: String,
    /// Transport security mode.
    pub tls: TlsMode,
}

impl CollectorEndpoint {
    pub fn new(endpoint: impl Into<String>, tls: TlsMode) -> Self {
        Self {
            endpoint: endpoint.into(),
            tls,
        }
    }

    /// The endpoint as a URL, adding a scheme derived from the TLS mode when
    /// the configured value has none.
    pub fn url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("{}://{}", self.tls.scheme(), self.endpoint)
        }
    }

    /// The URL a given signal's exporter should target.
    ///
    /// gRPC exporters use the base URL; OTLP/HTTP exporters need the
    /// per-signal path appended.
    pub fn signal_url(&self, protocol: OtlpProtocol, signal: SignalKind) -> String {
        let base = self.url();
        match protocol {
            OtlpProtocol::Grpc => base,
            OtlpProtocol::Http => {
                let path = signal.http_path();
                if base.ends_with(path) {
                    base
                } else {
                    format!("{}{}", base.trim_end_matches('/'), path)
                }
            }
        }
    }
}

impl fmt::Display for CollectorEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint)
    }
}

/// Service identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name for the OTEL resource.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Service version for the OTEL resource.
    #[serde(default = "default_service_version")]
    pub version: String,

    /// Value of `deployment.environment` and of the `environment` log field.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Extra resource attributes added to all telemetry.
    #[serde(default)]
    pub resource: BTreeMap<String, String>,
}

fn default_service_name() -> String {
    "opentelemetry-trace-emitter".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_environment() -> String {
    "production".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_service_version(),
            environment: default_environment(),
            resource: BTreeMap::new(),
        }
    }
}

/// Emission cadence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Interval between emission cycles in milliseconds (default: 5000).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    5_000
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl ScheduleConfig {
    /// Get the emission interval as Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Local log sink configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSinkConfig {
    /// Append every emitted log record as a JSON line to this file.
    /// The parent directory is created if missing.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl EmitterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: EmitterConfig = emitter_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: EmitterConfig = emitter_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply environment-style overrides from an arbitrary lookup.
    ///
    /// An empty endpoint is treated as unset. An interval that is not a
    /// positive integer is ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(COLLECTOR_ENDPOINT_ENV) {
            let endpoint = endpoint.trim();
            if !endpoint.is_empty() {
                self.collector.endpoint = Some(endpoint.to_string());
            }
        }

        if let Some(raw) = lookup(TRACE_INTERVAL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.schedule.interval_ms = ms,
                _ => warn!(
                    value = %raw,
                    default_ms = self.schedule.interval_ms,
                    "Ignoring invalid {}", TRACE_INTERVAL_ENV
                ),
            }
        }
    }

    /// The collector endpoint after defaults and overrides.
    pub fn collector_endpoint(&self) -> CollectorEndpoint {
        self.collector.resolve_endpoint()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(endpoint) = &self.collector.endpoint
            && endpoint.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "collector endpoint cannot be empty".to_string(),
            ));
        }

        if self.collector.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be > 0".to_string(),
            ));
        }

        if self.collector.export_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "export_interval_secs must be > 0".to_string(),
            ));
        }

        if self.schedule.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "interval_ms must be > 0".to_string(),
            ));
        }

        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "service name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
