//! In-process recording pipelines.
//!
//! These implement the pipeline traits without any transport: spans, metric
//! points and log events are kept in memory so tests can inspect exactly
//! what a cycle emitted. Each pipeline can be switched into a failing mode to
//! exercise error paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use opentelemetry::KeyValue;
use opentelemetry::trace::Status;
use parking_lot::Mutex;

use crate::config::CollectorEndpoint;
use crate::correlation::CorrelationContext;
use crate::error::{EmitterError, Result};
use crate::identity::ResourceIdentity;
use crate::logs::SyntheticLogEvent;
use crate::pipeline::{
    LogPipeline, MetricPipeline, PipelineFactory, ShutdownLatch, SignalKind, SignalPipeline,
    SpanHandle, TracePipeline,
};

/// Failure switches and call counters shared by every memory pipeline.
#[derive(Debug, Default)]
struct Controls {
    latch: ShutdownLatch,
    failing: AtomicBool,
    failing_shutdown: AtomicBool,
    flush_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
}

impl Controls {
    fn check_emit(&self, signal: SignalKind) -> Result<()> {
        self.latch.ensure_open(signal)?;
        if self.failing.load(Ordering::Acquire) {
            return Err(EmitterError::emit(signal, "injected failure"));
        }
        Ok(())
    }

    fn flush(&self, signal: SignalKind) -> Result<()> {
        self.flush_calls.fetch_add(1, Ordering::AcqRel);
        if self.failing_shutdown.load(Ordering::Acquire) {
            return Err(EmitterError::shutdown(signal, "injected flush failure"));
        }
        Ok(())
    }

    fn shutdown(&self, signal: SignalKind) -> Result<()> {
        if !self.latch.close() {
            return Ok(());
        }
        self.shutdown_calls.fetch_add(1, Ordering::AcqRel);
        if self.failing_shutdown.load(Ordering::Acquire) {
            return Err(EmitterError::shutdown(signal, "injected shutdown failure"));
        }
        Ok(())
    }
}

macro_rules! controls_accessors {
    () => {
        /// Make every emission fail.
        pub fn set_failing(&self, failing: bool) {
            self.controls.failing.store(failing, Ordering::Release);
        }

        /// Make flush and shutdown fail.
        pub fn set_failing_shutdown(&self, failing: bool) {
            self.controls.failing_shutdown.store(failing, Ordering::Release);
        }

        pub fn flush_calls(&self) -> usize {
            self.controls.flush_calls.load(Ordering::Acquire)
        }

        /// Number of shutdowns that actually closed the pipeline.
        pub fn shutdown_calls(&self) -> usize {
            self.controls.shutdown_calls.load(Ordering::Acquire)
        }
    };
}

/// A span that has ended.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedSpan {
    pub name: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub attributes: Vec<KeyValue>,
    pub events: Vec<(String, Vec<KeyValue>)>,
    pub status: Status,
}

impl FinishedSpan {
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Find an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&KeyValue> {
        self.attributes.iter().find(|kv| kv.key.as_str() == key)
    }
}

#[derive(Debug, Default)]
struct SpanStore {
    next_id: u64,
    finished: Vec<FinishedSpan>,
    open_roots: usize,
    max_open_roots: usize,
}

impl SpanStore {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Trace pipeline that records finished spans.
///
/// IDs come from a counter, so they are unique and non-zero but predictable.
#[derive(Debug, Default)]
pub struct MemoryTracePipeline {
    store: Arc<Mutex<SpanStore>>,
    controls: Controls,
}

impl MemoryTracePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    controls_accessors!();

    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        self.store.lock().finished.clone()
    }

    /// Root spans started but not yet ended.
    pub fn open_roots(&self) -> usize {
        self.store.lock().open_roots
    }

    /// Highest number of root spans that were open at the same time.
    pub fn max_open_roots(&self) -> usize {
        self.store.lock().max_open_roots
    }
}

impl SignalPipeline for MemoryTracePipeline {
    fn kind(&self) -> SignalKind {
        SignalKind::Traces
    }

    fn is_shut_down(&self) -> bool {
        self.controls.latch.is_closed()
    }

    fn force_flush(&self) -> Result<()> {
        self.controls.flush(SignalKind::Traces)
    }

    fn shutdown(&self) -> Result<()> {
        self.controls.shutdown(SignalKind::Traces)
    }
}

impl TracePipeline for MemoryTracePipeline {
    fn start_root(&self, name: &str) -> Result<Box<dyn SpanHandle>> {
        self.controls.check_emit(SignalKind::Traces)?;

        let mut store = self.store.lock();
        let trace_id = format!("{:032x}", store.next_id());
        let span_id = format!("{:016x}", store.next_id());
        store.open_roots += 1;
        store.max_open_roots = store.max_open_roots.max(store.open_roots);

        Ok(Box::new(MemorySpan::new(
            self.store.clone(),
            name,
            trace_id,
            span_id,
            None,
        )))
    }
}

struct MemorySpan {
    store: Arc<Mutex<SpanStore>>,
    span: FinishedSpan,
}

impl MemorySpan {
    fn new(
        store: Arc<Mutex<SpanStore>>,
        name: &str,
        trace_id: String,
        span_id: String,
        parent_span_id: Option<String>,
    ) -> Self {
        Self {
            store,
            span: FinishedSpan {
                name: name.to_string(),
                trace_id,
                span_id,
                parent_span_id,
                attributes: Vec::new(),
                events: Vec::new(),
                status: Status::Unset,
            },
        }
    }
}

impl SpanHandle for MemorySpan {
    fn trace_id(&self) -> String {
        self.span.trace_id.clone()
    }

    fn span_id(&self) -> String {
        self.span.span_id.clone()
    }

    fn set_attribute(&mut self, attribute: KeyValue) {
        self.span.attributes.push(attribute);
    }

    fn add_event(&mut self, name: String, attributes: Vec<KeyValue>) {
        self.span.events.push((name, attributes));
    }

    fn set_status(&mut self, status: Status) {
        self.span.status = status;
    }

    fn start_child(&self, name: &str) -> Result<Box<dyn SpanHandle>> {
        let span_id = format!("{:016x}", self.store.lock().next_id());
        Ok(Box::new(MemorySpan::new(
            self.store.clone(),
            name,
            self.span.trace_id.clone(),
            span_id,
            Some(self.span.span_id.clone()),
        )))
    }

    fn end(self: Box<Self>) {
        let MemorySpan { store, span } = *self;
        let mut store = store.lock();
        if span.is_root() {
            store.open_roots = store.open_roots.saturating_sub(1);
        }
        store.finished.push(span);
    }
}

/// Which instrument a metric point was recorded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricInstrument {
    RequestCount,
    RequestDuration,
}

/// One recorded metric point with its exemplar context.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub instrument: MetricInstrument,
    pub value: f64,
    pub attributes: Vec<KeyValue>,
    pub trace_id: String,
    pub span_id: String,
}

/// Metric pipeline that records every point.
#[derive(Debug, Default)]
pub struct MemoryMetricPipeline {
    points: Mutex<Vec<MetricPoint>>,
    controls: Controls,
}

impl MemoryMetricPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    controls_accessors!();

    pub fn points(&self) -> Vec<MetricPoint> {
        self.points.lock().clone()
    }

    /// Sum of all `request_count` increments.
    pub fn request_total(&self) -> u64 {
        self.points
            .lock()
            .iter()
            .filter(|p| p.instrument == MetricInstrument::RequestCount)
            .map(|p| p.value as u64)
            .sum()
    }

    fn push(
        &self,
        instrument: MetricInstrument,
        value: f64,
        attributes: &[KeyValue],
        context: &CorrelationContext,
    ) -> Result<()> {
        self.controls.check_emit(SignalKind::Metrics)?;
        self.points.lock().push(MetricPoint {
            instrument,
            value,
            attributes: attributes.to_vec(),
            trace_id: context.trace_id().to_string(),
            span_id: context.span_id().to_string(),
        });
        Ok(())
    }
}

impl SignalPipeline for MemoryMetricPipeline {
    fn kind(&self) -> SignalKind {
        SignalKind::Metrics
    }

    fn is_shut_down(&self) -> bool {
        self.controls.latch.is_closed()
    }

    fn force_flush(&self) -> Result<()> {
        self.controls.flush(SignalKind::Metrics)
    }

    fn shutdown(&self) -> Result<()> {
        self.controls.shutdown(SignalKind::Metrics)
    }
}

impl MetricPipeline for MemoryMetricPipeline {
    fn add_request(
        &self,
        value: u64,
        attributes: &[KeyValue],
        context: &CorrelationContext,
    ) -> Result<()> {
        self.push(MetricInstrument::RequestCount, value as f64, attributes, context)
    }

    fn record_duration(
        &self,
        value: f64,
        attributes: &[KeyValue],
        context: &CorrelationContext,
    ) -> Result<()> {
        self.push(MetricInstrument::RequestDuration, value, attributes, context)
    }
}

/// Log pipeline that records every event.
#[derive(Debug, Default)]
pub struct MemoryLogPipeline {
    events: Mutex<Vec<SyntheticLogEvent>>,
    controls: Controls,
}

impl MemoryLogPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    controls_accessors!();

    pub fn events(&self) -> Vec<SyntheticLogEvent> {
        self.events.lock().clone()
    }
}

impl SignalPipeline for MemoryLogPipeline {
    fn kind(&self) -> SignalKind {
        SignalKind::Logs
    }

    fn is_shut_down(&self) -> bool {
        self.controls.latch.is_closed()
    }

    fn force_flush(&self) -> Result<()> {
        self.controls.flush(SignalKind::Logs)
    }

    fn shutdown(&self) -> Result<()> {
        self.controls.shutdown(SignalKind::Logs)
    }
}

impl LogPipeline for MemoryLogPipeline {
    fn emit(&self, event: &SyntheticLogEvent) -> Result<()> {
        self.controls.check_emit(SignalKind::Logs)?;
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Builds memory pipelines and remembers what it built.
#[derive(Debug, Default)]
pub struct MemoryPipelineFactory {
    fail_on: Mutex<Vec<SignalKind>>,
    endpoints: Mutex<Vec<(SignalKind, CollectorEndpoint)>>,
    trace: Mutex<Option<Arc<MemoryTracePipeline>>>,
    metrics: Mutex<Option<Arc<MemoryMetricPipeline>>>,
    logs: Mutex<Option<Arc<MemoryLogPipeline>>>,
}

impl MemoryPipelineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make construction of `signal` fail with an exporter construction error.
    pub fn fail_on(self, signal: SignalKind) -> Self {
        self.fail_on.lock().push(signal);
        self
    }

    /// Endpoints each pipeline was constructed against, in construction order.
    pub fn endpoints(&self) -> Vec<(SignalKind, CollectorEndpoint)> {
        self.endpoints.lock().clone()
    }

    pub fn trace(&self) -> Option<Arc<MemoryTracePipeline>> {
        self.trace.lock().clone()
    }

    pub fn metrics(&self) -> Option<Arc<MemoryMetricPipeline>> {
        self.metrics.lock().clone()
    }

    pub fn logs(&self) -> Option<Arc<MemoryLogPipeline>> {
        self.logs.lock().clone()
    }

    fn construct(&self, signal: SignalKind, endpoint: &CollectorEndpoint) -> Result<()> {
        if self.fail_on.lock().contains(&signal) {
            return Err(EmitterError::construction(
                signal,
                endpoint.url(),
                "injected construction failure",
            ));
        }
        self.endpoints.lock().push((signal, endpoint.clone()));
        Ok(())
    }
}

impl PipelineFactory for MemoryPipelineFactory {
    fn trace_pipeline(
        &self,
        endpoint: &CollectorEndpoint,
        _identity: &ResourceIdentity,
    ) -> Result<Arc<dyn TracePipeline>> {
        self.construct(SignalKind::Traces, endpoint)?;
        let pipeline = Arc::new(MemoryTracePipeline::new());
        *self.trace.lock() = Some(pipeline.clone());
        Ok(pipeline)
    }

    fn metric_pipeline(
        &self,
        endpoint: &CollectorEndpoint,
        _identity: &ResourceIdentity,
    ) -> Result<Arc<dyn MetricPipeline>> {
        self.construct(SignalKind::Metrics, endpoint)?;
        let pipeline = Arc::new(MemoryMetricPipeline::new());
        *self.metrics.lock() = Some(pipeline.clone());
        Ok(pipeline)
    }

    fn log_pipeline(
        &self,
        endpoint: &CollectorEndpoint,
        _identity: &ResourceIdentity,
    ) -> Result<Arc<dyn LogPipeline>> {
        self.construct(SignalKind::Logs, endpoint)?;
        let pipeline = Arc::new(MemoryLogPipeline::new());
        *self.logs.lock() = Some(pipeline.clone());
        Ok(pipeline)
    }
}
