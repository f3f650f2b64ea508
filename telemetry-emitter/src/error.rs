//! Error taxonomy for the emitter.

use thiserror::Error;

use crate::config::ConfigError;
use crate::pipeline::SignalKind;

/// Result type alias using [`EmitterError`].
pub type Result<T> = std::result::Result<T, EmitterError>;

/// Errors raised while starting, running or stopping the emitter.
#[derive(Debug, Error)]
pub enum EmitterError {
    /// The OS entropy source could not produce random bytes.
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),

    /// An exporter or provider for one signal could not be built.
    #[error("Failed to construct {signal} exporter for {endpoint}: {message}")]
    ExporterConstruction {
        signal: SignalKind,
        endpoint: String,
        message: String,
    },

    /// The log file sink could not be created or opened.
    #[error("Log sink unavailable at {path}: {source}")]
    LogSink {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Emission was attempted after the pipeline started shutting down.
    #[error("{0} pipeline is shut down")]
    PipelineClosed(SignalKind),

    /// A single emission failed.
    #[error("Failed to emit {signal}: {message}")]
    Emit { signal: SignalKind, message: String },

    /// Flushing or closing a pipeline failed.
    #[error("Failed to shut down {signal} pipeline: {message}")]
    Shutdown { signal: SignalKind, message: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EmitterError {
    /// Create an exporter construction error.
    pub fn construction(
        signal: SignalKind,
        endpoint: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self::ExporterConstruction {
            signal,
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create an emission error.
    pub fn emit(signal: SignalKind, message: impl ToString) -> Self {
        Self::Emit {
            signal,
            message: message.to_string(),
        }
    }

    /// Create a shutdown error.
    pub fn shutdown(signal: SignalKind, message: impl ToString) -> Self {
        Self::Shutdown {
            signal,
            message: message.to_string(),
        }
    }

    /// Whether this error must abort the process before the scheduler runs.
    ///
    /// Emission and shutdown errors are reported and absorbed instead.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Entropy(_)
            | Self::ExporterConstruction { .. }
            | Self::LogSink { .. }
            | Self::Config(_) => true,
            Self::PipelineClosed(_)
            | Self::Emit { .. }
            | Self::Shutdown { .. }
            | Self::Serialization(_) => false,
        }
    }

    /// The signal this error relates to, if any.
    pub fn signal(&self) -> Option<SignalKind> {
        match self {
            Self::ExporterConstruction { signal, .. }
            | Self::Emit { signal, .. }
            | Self::Shutdown { signal, .. } => Some(*signal),
            Self::PipelineClosed(signal) => Some(*signal),
            Self::LogSink { .. } => Some(SignalKind::Logs),
            Self::Entropy(_) | Self::Serialization(_) | Self::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_errors_are_fatal() {
        assert!(EmitterError::Entropy("no entropy".into()).is_fatal());
        assert!(
            EmitterError::construction(SignalKind::Metrics, "http://x:4317", "bad uri").is_fatal()
        );
        assert!(
            EmitterError::LogSink {
                path: "/tmp/x".into(),
                source: std::io::Error::other("denied"),
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_cycle_errors_are_recoverable() {
        assert!(!EmitterError::PipelineClosed(SignalKind::Logs).is_fatal());
        assert!(!EmitterError::emit(SignalKind::Traces, "queue full").is_fatal());
        assert!(!EmitterError::shutdown(SignalKind::Metrics, "timeout").is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = EmitterError::construction(SignalKind::Logs, "http://collector:4317", "boom");
        assert_eq!(
            err.to_string(),
            "Failed to construct logs exporter for http://collector:4317: boom"
        );
        assert_eq!(err.signal(), Some(SignalKind::Logs));

        let err = EmitterError::PipelineClosed(SignalKind::Traces);
        assert_eq!(err.to_string(), "traces pipeline is shut down");
    }
}
