//! Narrow interfaces between the emission engine and the signal pipelines.
//!
//! The engine never touches an OpenTelemetry provider directly. Each signal
//! kind is reached through one trait object, built by a [`PipelineFactory`],
//! so the OTLP-backed pipelines ([`crate::otlp`]) and the in-process
//! recording pipelines ([`crate::memory`]) are interchangeable.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use opentelemetry::KeyValue;
use opentelemetry::trace::Status;
use serde::{Deserialize, Serialize};

use crate::config::CollectorEndpoint;
use crate::correlation::CorrelationContext;
use crate::error::{EmitterError, Result};
use crate::identity::ResourceIdentity;
use crate::logs::SyntheticLogEvent;

/// The three telemetry signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Traces,
    Metrics,
    Logs,
}

impl SignalKind {
    /// All signal kinds, in startup and shutdown order.
    pub const ALL: [SignalKind; 3] = [SignalKind::Traces, SignalKind::Metrics, SignalKind::Logs];

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Traces => "traces",
            SignalKind::Metrics => "metrics",
            SignalKind::Logs => "logs",
        }
    }

    /// OTLP/HTTP path for this signal.
    pub fn http_path(&self) -> &'static str {
        match self {
            SignalKind::Traces => "/v1/traces",
            SignalKind::Metrics => "/v1/metrics",
            SignalKind::Logs => "/v1/logs",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An open span. Ending consumes the handle, so a span ends at most once.
pub trait SpanHandle: Send {
    /// Trace ID as 32 lowercase hex characters.
    fn trace_id(&self) -> String;

    /// Span ID as 16 lowercase hex characters.
    fn span_id(&self) -> String;

    fn set_attribute(&mut self, attribute: KeyValue);

    fn add_event(&mut self, name: String, attributes: Vec<KeyValue>);

    fn set_status(&mut self, status: Status);

    /// Open a child span parented to this one.
    fn start_child(&self, name: &str) -> Result<Box<dyn SpanHandle>>;

    fn end(self: Box<Self>);
}

/// Lifecycle shared by every signal pipeline.
pub trait SignalPipeline: Send + Sync {
    fn kind(&self) -> SignalKind;

    /// Whether shutdown has begun. No emission is accepted afterwards.
    fn is_shut_down(&self) -> bool;

    /// Push everything buffered so far to the exporter.
    fn force_flush(&self) -> Result<()>;

    /// Close the pipeline, joining its background export. Idempotent.
    fn shutdown(&self) -> Result<()>;
}

/// Span emission.
pub trait TracePipeline: SignalPipeline {
    /// Open a new root span with fresh trace and span IDs.
    fn start_root(&self, name: &str) -> Result<Box<dyn SpanHandle>>;
}

/// Metric emission.
pub trait MetricPipeline: SignalPipeline {
    /// Add to the monotonic request counter.
    fn add_request(
        &self,
        value: u64,
        attributes: &[KeyValue],
        context: &CorrelationContext,
    ) -> Result<()>;

    /// Record a sample into the request duration histogram.
    fn record_duration(
        &self,
        value: f64,
        attributes: &[KeyValue],
        context: &CorrelationContext,
    ) -> Result<()>;
}

/// Log record emission.
pub trait LogPipeline: SignalPipeline {
    fn emit(&self, event: &SyntheticLogEvent) -> Result<()>;
}

/// Builds one pipeline per signal against a collector endpoint.
///
/// Every constructor must fail with [`EmitterError::ExporterConstruction`]
/// (or [`EmitterError::LogSink`]) rather than return a half-working pipeline.
pub trait PipelineFactory {
    fn trace_pipeline(
        &self,
        endpoint: &CollectorEndpoint,
        identity: &ResourceIdentity,
    ) -> Result<Arc<dyn TracePipeline>>;

    fn metric_pipeline(
        &self,
        endpoint: &CollectorEndpoint,
        identity: &ResourceIdentity,
    ) -> Result<Arc<dyn MetricPipeline>>;

    fn log_pipeline(
        &self,
        endpoint: &CollectorEndpoint,
        identity: &ResourceIdentity,
    ) -> Result<Arc<dyn LogPipeline>>;
}

/// One-way open → closed latch used by pipeline implementations.
#[derive(Debug, Default)]
pub struct ShutdownLatch {
    closed: AtomicBool,
}

impl ShutdownLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`EmitterError::PipelineClosed`] once the latch is closed.
    pub fn ensure_open(&self, signal: SignalKind) -> Result<()> {
        if self.is_closed() {
            return Err(EmitterError::PipelineClosed(signal));
        }
        Ok(())
    }

    /// Close the latch. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_kind_strings() {
        assert_eq!(SignalKind::Traces.to_string(), "traces");
        assert_eq!(SignalKind::Metrics.as_str(), "metrics");
        assert_eq!(SignalKind::Logs.http_path(), "/v1/logs");
    }

    #[test]
    fn test_signal_kind_order() {
        let mut kinds = vec![SignalKind::Logs, SignalKind::Traces, SignalKind::Metrics];
        kinds.sort();
        assert_eq!(kinds, SignalKind::ALL.to_vec());
    }

    #[test]
    fn test_latch_closes_once() {
        let latch = ShutdownLatch::new();
        assert!(latch.ensure_open(SignalKind::Logs).is_ok());

        assert!(latch.close());
        assert!(!latch.close());
        assert!(latch.is_closed());

        let err = latch.ensure_open(SignalKind::Logs).unwrap_err();
        assert!(matches!(err, EmitterError::PipelineClosed(SignalKind::Logs)));
    }
}
