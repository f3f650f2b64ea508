//! OTLP-backed signal pipelines.
//!
//! Each pipeline owns one OpenTelemetry SDK provider built around an OTLP
//! exporter. Batching and periodic export happen inside the providers;
//! `shutdown` flushes and joins their background work.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::logs::{LogRecord as _, Logger as _, LoggerProvider as _, Severity};
use opentelemetry::metrics::{Counter, Histogram, MeterProvider as _};
use opentelemetry::trace::{
    SpanContext, SpanId, Status, TraceContextExt, TraceFlags, TraceId, TraceState,
    Tracer as _, TracerProvider as _,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::{LogExporter, MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::info;

use crate::config::{CollectorEndpoint, EmitterConfig, OtlpProtocol};
use crate::correlation::CorrelationContext;
use crate::error::{EmitterError, Result};
use crate::identity::ResourceIdentity;
use crate::logs::SyntheticLogEvent;
use crate::pipeline::{
    LogPipeline, MetricPipeline, PipelineFactory, ShutdownLatch, SignalKind, SignalPipeline,
    SpanHandle, TracePipeline,
};

/// Instrumentation scope for spans.
pub const TRACER_NAME: &str = "random-tracer";
/// Instrumentation scope for metrics.
pub const METER_NAME: &str = "custom-metrics";
/// Instrumentation scope for log records.
pub const LOGGER_NAME: &str = "otel-logger";

/// Monotonic counter incremented once per cycle.
pub const REQUEST_COUNT_METRIC: &str = "request_count";
/// Histogram of synthetic request durations.
pub const REQUEST_DURATION_METRIC: &str = "request_duration";

/// Builds OTLP pipelines from the emitter configuration.
#[derive(Debug, Clone)]
pub struct OtlpPipelineFactory {
    protocol: OtlpProtocol,
    timeout: Duration,
    export_interval: Duration,
    environment: String,
    resource: BTreeMap<String, String>,
}

impl OtlpPipelineFactory {
    pub fn new(config: &EmitterConfig) -> Self {
        Self {
            protocol: config.collector.protocol,
            timeout: config.collector.timeout(),
            export_interval: config.collector.export_interval(),
            environment: config.service.environment.clone(),
            resource: config.service.resource.clone(),
        }
    }

    fn resource(&self, identity: &ResourceIdentity) -> Resource {
        let attrs = identity.resource_attributes(&self.environment, &self.resource);
        Resource::builder().with_attributes(attrs).build()
    }

    fn log_start(&self, signal: SignalKind, url: &str) {
        info!(
            signal = %signal,
            endpoint = %url,
            protocol = ?self.protocol,
            "Initializing OTLP pipeline"
        );
    }
}

impl PipelineFactory for OtlpPipelineFactory {
    fn trace_pipeline(
        &self,
        endpoint: &CollectorEndpoint,
        identity: &ResourceIdentity,
    ) -> Result<Arc<dyn TracePipeline>> {
        let url = endpoint.signal_url(self.protocol, SignalKind::Traces);
        self.log_start(SignalKind::Traces, &url);

        let exporter = match self.protocol {
            OtlpProtocol::Grpc => SpanExporter::builder()
                .with_tonic()
                .with_endpoint(&url)
                .with_timeout(self.timeout)
                .build(),
            OtlpProtocol::Http => SpanExporter::builder()
                .with_http()
                .with_endpoint(&url)
                .with_timeout(self.timeout)
                .build(),
        }
        .map_err(|e| EmitterError::construction(SignalKind::Traces, &url, e))?;

        let provider = SdkTracerProvider::builder()
            .with_resource(self.resource(identity))
            .with_batch_exporter(exporter)
            .build();

        info!("Tracer provider initialized");
        Ok(Arc::new(OtlpTracePipeline {
            provider,
            latch: ShutdownLatch::new(),
        }))
    }

    fn metric_pipeline(
        &self,
        endpoint: &CollectorEndpoint,
        identity: &ResourceIdentity,
    ) -> Result<Arc<dyn MetricPipeline>> {
        let url = endpoint.signal_url(self.protocol, SignalKind::Metrics);
        self.log_start(SignalKind::Metrics, &url);

        let exporter = match self.protocol {
            OtlpProtocol::Grpc => MetricExporter::builder()
                .with_tonic()
                .with_endpoint(&url)
                .with_timeout(self.timeout)
                .build(),
            OtlpProtocol::Http => MetricExporter::builder()
                .with_http()
                .with_endpoint(&url)
                .with_timeout(self.timeout)
                .build(),
        }
        .map_err(|e| EmitterError::construction(SignalKind::Metrics, &url, e))?;

        let reader = PeriodicReader::builder(exporter)
            .with_interval(self.export_interval)
            .build();

        let provider = SdkMeterProvider::builder()
            .with_resource(self.resource(identity))
            .with_reader(reader)
            .build();

        let meter = provider.meter(METER_NAME);
        let request_count = meter
            .u64_counter(REQUEST_COUNT_METRIC)
            .with_description("Number of synthetic requests")
            .build();
        let request_duration = meter
            .f64_histogram(REQUEST_DURATION_METRIC)
            .with_description("Duration of synthetic requests")
            .with_unit("ms")
            .build();

        info!("Meter provider initialized");
        Ok(Arc::new(OtlpMetricPipeline {
            provider,
            request_count,
            request_duration,
            latch: ShutdownLatch::new(),
        }))
    }

    fn log_pipeline(
        &self,
        endpoint: &CollectorEndpoint,
        identity: &ResourceIdentity,
    ) -> Result<Arc<dyn LogPipeline>> {
        let url = endpoint.signal_url(self.protocol, SignalKind::Logs);
        self.log_start(SignalKind::Logs, &url);

        let exporter = match self.protocol {
            OtlpProtocol::Grpc => LogExporter::builder()
                .with_tonic()
                .with_endpoint(&url)
                .with_timeout(self.timeout)
                .build(),
            OtlpProtocol::Http => LogExporter::builder()
                .with_http()
                .with_endpoint(&url)
                .with_timeout(self.timeout)
                .build(),
        }
        .map_err(|e| EmitterError::construction(SignalKind::Logs, &url, e))?;

        let provider = SdkLoggerProvider::builder()
            .with_resource(self.resource(identity))
            .with_batch_exporter(exporter)
            .build();

        info!("Logger provider initialized");
        Ok(Arc::new(OtlpLogPipeline {
            provider,
            latch: ShutdownLatch::new(),
        }))
    }
}

/// Context carrying the cycle's root span as a remote parent, so the SDK
/// stamps log records and exemplars with the cycle's IDs.
fn remote_context(context: &CorrelationContext) -> Context {
    let (Ok(trace_id), Ok(span_id)) = (
        TraceId::from_hex(context.trace_id()),
        SpanId::from_hex(context.span_id()),
    ) else {
        return Context::current();
    };

    let span_context = SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    Context::current().with_remote_span_context(span_context)
}

fn sdk_error(signal: SignalKind, action: &str, e: impl std::fmt::Debug) -> EmitterError {
    EmitterError::shutdown(signal, format!("{} failed: {:?}", action, e))
}

/// Trace pipeline over an [`SdkTracerProvider`].
pub struct OtlpTracePipeline {
    provider: SdkTracerProvider,
    latch: ShutdownLatch,
}

impl SignalPipeline for OtlpTracePipeline {
    fn kind(&self) -> SignalKind {
        SignalKind::Traces
    }

    fn is_shut_down(&self) -> bool {
        self.latch.is_closed()
    }

    fn force_flush(&self) -> Result<()> {
        self.provider
            .force_flush()
            .map_err(|e| sdk_error(SignalKind::Traces, "flush", e))
    }

    fn shutdown(&self) -> Result<()> {
        if !self.latch.close() {
            return Ok(());
        }
        self.provider
            .shutdown()
            .map_err(|e| sdk_error(SignalKind::Traces, "shutdown", e))
    }
}

impl TracePipeline for OtlpTracePipeline {
    fn start_root(&self, name: &str) -> Result<Box<dyn SpanHandle>> {
        self.latch.ensure_open(SignalKind::Traces)?;

        let span = self
            .provider
            .tracer(TRACER_NAME)
            .start_with_context(name.to_string(), &Context::new());

        Ok(Box::new(OtlpSpan {
            provider: self.provider.clone(),
            cx: Context::new().with_span(span),
        }))
    }
}

/// A live SDK span, held inside the context it was started in.
struct OtlpSpan {
    provider: SdkTracerProvider,
    cx: Context,
}

impl SpanHandle for OtlpSpan {
    fn trace_id(&self) -> String {
        self.cx.span().span_context().trace_id().to_string()
    }

    fn span_id(&self) -> String {
        self.cx.span().span_context().span_id().to_string()
    }

    fn set_attribute(&mut self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    fn add_event(&mut self, name: String, attributes: Vec<KeyValue>) {
        self.cx.span().add_event(name, attributes);
    }

    fn set_status(&mut self, status: Status) {
        self.cx.span().set_status(status);
    }

    fn start_child(&self, name: &str) -> Result<Box<dyn SpanHandle>> {
        let span = self
            .provider
            .tracer(TRACER_NAME)
            .start_with_context(name.to_string(), &self.cx);

        Ok(Box::new(OtlpSpan {
            provider: self.provider.clone(),
            cx: self.cx.with_span(span),
        }))
    }

    fn end(self: Box<Self>) {
        self.cx.span().end();
    }
}

/// Metric pipeline over an [`SdkMeterProvider`] with pre-built instruments.
pub struct OtlpMetricPipeline {
    provider: SdkMeterProvider,
    request_count: Counter<u64>,
    request_duration: Histogram<f64>,
    latch: ShutdownLatch,
}

impl SignalPipeline for OtlpMetricPipeline {
    fn kind(&self) -> SignalKind {
        SignalKind::Metrics
    }

    fn is_shut_down(&self) -> bool {
        self.latch.is_closed()
    }

    fn force_flush(&self) -> Result<()> {
        self.provider
            .force_flush()
            .map_err(|e| sdk_error(SignalKind::Metrics, "flush", e))
    }

    fn shutdown(&self) -> Result<()> {
        if !self.latch.close() {
            return Ok(());
        }
        self.provider
            .shutdown()
            .map_err(|e| sdk_error(SignalKind::Metrics, "shutdown", e))
    }
}

impl MetricPipeline for OtlpMetricPipeline {
    fn add_request(
        &self,
        value: u64,
        attributes: &[KeyValue],
        context: &CorrelationContext,
    ) -> Result<()> {
        self.latch.ensure_open(SignalKind::Metrics)?;
        let _guard = remote_context(context).attach();
        self.request_count.add(value, attributes);
        Ok(())
    }

    fn record_duration(
        &self,
        value: f64,
        attributes: &[KeyValue],
        context: &CorrelationContext,
    ) -> Result<()> {
        self.latch.ensure_open(SignalKind::Metrics)?;
        let _guard = remote_context(context).attach();
        self.request_duration.record(value, attributes);
        Ok(())
    }
}

/// Log pipeline over an [`SdkLoggerProvider`].
pub struct OtlpLogPipeline {
    provider: SdkLoggerProvider,
    latch: ShutdownLatch,
}

impl SignalPipeline for OtlpLogPipeline {
    fn kind(&self) -> SignalKind {
        SignalKind::Logs
    }

    fn is_shut_down(&self) -> bool {
        self.latch.is_closed()
    }

    fn force_flush(&self) -> Result<()> {
        self.provider
            .force_flush()
            .map_err(|e| sdk_error(SignalKind::Logs, "flush", e))
    }

    fn shutdown(&self) -> Result<()> {
        if !self.latch.close() {
            return Ok(());
        }
        self.provider
            .shutdown()
            .map_err(|e| sdk_error(SignalKind::Logs, "shutdown", e))
    }
}

impl LogPipeline for OtlpLogPipeline {
    fn emit(&self, event: &SyntheticLogEvent) -> Result<()> {
        self.latch.ensure_open(SignalKind::Logs)?;

        let logger = self.provider.logger(LOGGER_NAME);
        let mut record = logger.create_log_record();
        record.set_body(event.message.as_str().to_string().into());
        record.set_severity_number(Severity::Info);
        record.set_severity_text("INFO");
        record.set_timestamp(event.timestamp);
        for (key, value) in &event.fields {
            record.add_attribute(key.clone(), value.clone());
        }

        {
            let cx = event
                .trace_id()
                .zip(event.span_id())
                .map(|(trace_id, span_id)| {
                    CorrelationContext::new(trace_id.to_string(), span_id.to_string())
                });
            let _guard = cx.as_ref().map(|cx| remote_context(cx).attach());
            logger.emit(record);
        }

        info!(
            trace_id = event.trace_id().unwrap_or_default(),
            span_id = event.span_id().unwrap_or_default(),
            "{}",
            event.message
        );

        Ok(())
    }
}
