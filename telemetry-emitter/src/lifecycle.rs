//! Startup and ordered shutdown of the three signal pipelines.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::CollectorEndpoint;
use crate::error::{EmitterError, Result};
use crate::identity::ResourceIdentity;
use crate::logs::FileLogSink;
use crate::pipeline::{
    LogPipeline, MetricPipeline, PipelineFactory, ShutdownLatch, SignalPipeline, TracePipeline,
};

/// Outcome of [`Pipelines::shutdown`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Flush and close failures, in shutdown order.
    pub failures: Vec<EmitterError>,
    /// The pipelines had already been shut down; nothing was done.
    pub already_shut_down: bool,
}

impl ShutdownReport {
    /// Whether every pipeline flushed and closed cleanly.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The live trace, metric and log pipelines.
///
/// Either all three exist or none do: [`Pipelines::start`] tears down the
/// pipelines it already built when a later one fails.
pub struct Pipelines {
    trace: Arc<dyn TracePipeline>,
    metrics: Arc<dyn MetricPipeline>,
    logs: Arc<dyn LogPipeline>,
    file_sink: Option<FileLogSink>,
    latch: ShutdownLatch,
}

impl Pipelines {
    /// Assemble already constructed pipelines.
    pub fn new(
        trace: Arc<dyn TracePipeline>,
        metrics: Arc<dyn MetricPipeline>,
        logs: Arc<dyn LogPipeline>,
    ) -> Self {
        Self {
            trace,
            metrics,
            logs,
            file_sink: None,
            latch: ShutdownLatch::new(),
        }
    }

    /// Also append every log record to a local file.
    pub fn with_file_sink(mut self, sink: FileLogSink) -> Self {
        self.file_sink = Some(sink);
        self
    }

    /// Construct all three pipelines against `endpoint`.
    ///
    /// The identity must already be resolved. Any construction failure is
    /// returned as-is after the pipelines built so far have been shut down.
    pub fn start(
        identity: &ResourceIdentity,
        endpoint: &CollectorEndpoint,
        factory: &dyn PipelineFactory,
    ) -> Result<Self> {
        info!(
            endpoint = %endpoint.url(),
            instance_id = %identity.instance_id(),
            "Starting telemetry pipelines"
        );

        let trace = factory.trace_pipeline(endpoint, identity)?;

        let metrics = match factory.metric_pipeline(endpoint, identity) {
            Ok(metrics) => metrics,
            Err(e) => {
                abandon(trace.as_ref());
                return Err(e);
            }
        };

        let logs = match factory.log_pipeline(endpoint, identity) {
            Ok(logs) => logs,
            Err(e) => {
                abandon(trace.as_ref());
                abandon(metrics.as_ref());
                return Err(e);
            }
        };

        info!("All telemetry pipelines started");
        Ok(Self::new(trace, metrics, logs))
    }

    pub fn trace(&self) -> &dyn TracePipeline {
        self.trace.as_ref()
    }

    pub fn metrics(&self) -> &dyn MetricPipeline {
        self.metrics.as_ref()
    }

    pub fn logs(&self) -> &dyn LogPipeline {
        self.logs.as_ref()
    }

    pub fn file_sink(&self) -> Option<&FileLogSink> {
        self.file_sink.as_ref()
    }

    pub fn is_shut_down(&self) -> bool {
        self.latch.is_closed()
    }

    /// Flush and close every pipeline, traces then metrics then logs.
    ///
    /// A failure in one pipeline never skips the others. Failures are
    /// logged and returned in the report, never raised. Calls after the
    /// first do nothing.
    pub fn shutdown(&self) -> ShutdownReport {
        if !self.latch.close() {
            warn!("Pipelines already shut down");
            return ShutdownReport {
                failures: Vec::new(),
                already_shut_down: true,
            };
        }

        info!("Shutting down telemetry pipelines");

        let mut report = ShutdownReport::default();
        flush_and_close(self.trace.as_ref(), &mut report);
        flush_and_close(self.metrics.as_ref(), &mut report);
        flush_and_close(self.logs.as_ref(), &mut report);

        info!(failures = report.failures.len(), "Telemetry pipelines shut down");
        report
    }
}

fn flush_and_close<P: SignalPipeline + ?Sized>(pipeline: &P, report: &mut ShutdownReport) {
    if let Err(e) = pipeline.force_flush() {
        error!(signal = %pipeline.kind(), "Error flushing pipeline: {}", e);
        report.failures.push(e);
    }
    if let Err(e) = pipeline.shutdown() {
        error!(signal = %pipeline.kind(), "Error shutting down pipeline: {}", e);
        report.failures.push(e);
    }
}

fn abandon<P: SignalPipeline + ?Sized>(pipeline: &P) {
    if let Err(e) = pipeline.shutdown() {
        warn!(signal = %pipeline.kind(), "Error shutting down partially started pipeline: {}", e);
    }
}
