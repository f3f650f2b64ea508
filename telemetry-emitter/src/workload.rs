//! Synthetic workload: one simulated operation per cycle, emitted as a
//! child span, a correlated log record and two metric points.

use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::trace::Status;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::correlation::{CorrelationContext, CycleGuard, begin_cycle, end_cycle};
use crate::error::EmitterError;
use crate::identity::ResourceIdentity;
use crate::lifecycle::Pipelines;
use crate::logs::{LogMessage, SyntheticLogEvent};
use crate::pipeline::SignalKind;

/// Name of the root span opened for every cycle.
pub const ROOT_SPAN_NAME: &str = "random-trace";

/// Simulated latency is drawn from `[0, MAX_LATENCY_MS)`.
pub const MAX_LATENCY_MS: u64 = 500;

/// Histogram samples are drawn from `[0, MAX_DURATION_SAMPLE)`.
pub const MAX_DURATION_SAMPLE: u64 = 100;

const HTTP_STATUS_CODES: [i64; 6] = [200, 201, 400, 401, 403, 500];

const DB_STATEMENTS: [&str; 3] = [
    "SELECT * FROM users",
    "UPDATE orders SET status=\"shipped\"",
    "DELETE FROM sessions",
];

/// Fixed vocabulary of operation labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationLabel {
    DatabaseQuery,
    ApiCall,
    CacheFetch,
    FileRead,
}

impl OperationLabel {
    pub const ALL: [OperationLabel; 4] = [
        OperationLabel::DatabaseQuery,
        OperationLabel::ApiCall,
        OperationLabel::CacheFetch,
        OperationLabel::FileRead,
    ];

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseQuery => "database-query",
            Self::ApiCall => "api-call",
            Self::CacheFetch => "cache-fetch",
            Self::FileRead => "file-read",
        }
    }
}

impl std::fmt::Display for OperationLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The simulated unit of work for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticOperation {
    pub label: OperationLabel,
    pub simulated_latency_ms: u64,
}

impl SyntheticOperation {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

/// What a single cycle emitted.
#[derive(Debug)]
pub struct CycleReport {
    pub operation: SyntheticOperation,
    pub message: LogMessage,
    pub context: CorrelationContext,
    pub spans_emitted: u64,
    pub logs_emitted: u64,
    pub metric_points: u64,
    /// Emission errors, in the order they happened.
    pub failures: Vec<EmitterError>,
}

impl CycleReport {
    /// Signals that failed at least once during the cycle.
    pub fn failed_signals(&self) -> Vec<SignalKind> {
        let mut signals: Vec<_> = self.failures.iter().filter_map(|e| e.signal()).collect();
        signals.sort();
        signals.dedup();
        signals
    }

    fn record_failure(&mut self, stage: &str, error: EmitterError) {
        warn!(
            operation = %self.operation.label,
            trace_id = %self.context.trace_id(),
            "Failed to emit {}: {}",
            stage,
            error
        );
        self.failures.push(error);
    }
}

/// Drives synthetic emission through the pipelines.
pub struct WorkloadGenerator {
    rng: StdRng,
    identity: ResourceIdentity,
    environment: String,
}

impl WorkloadGenerator {
    /// Create a generator seeded from OS entropy.
    pub fn new(identity: ResourceIdentity, environment: impl Into<String>) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            identity,
            environment: environment.into(),
        }
    }

    /// Create a generator with a fixed seed.
    pub fn with_seed(
        identity: ResourceIdentity,
        environment: impl Into<String>,
        seed: u64,
    ) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            identity,
            environment: environment.into(),
        }
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    /// Pick the next operation uniformly from the vocabulary.
    pub fn next_operation(&mut self) -> SyntheticOperation {
        let label = OperationLabel::ALL[self.rng.gen_range(0..OperationLabel::ALL.len())];
        SyntheticOperation {
            label,
            simulated_latency_ms: self.rng.gen_range(0..MAX_LATENCY_MS),
        }
    }

    fn span_attributes(&mut self, operation: &SyntheticOperation) -> Vec<KeyValue> {
        let mut attrs = vec![KeyValue::new(
            "processing.time_ms",
            operation.simulated_latency_ms as i64,
        )];

        if self.rng.gen_bool(0.5) {
            attrs.push(KeyValue::new(
                "enduser.id",
                format!("user-{}", self.rng.gen_range(0..1000)),
            ));
        }
        if self.rng.gen_bool(0.5) {
            let code = HTTP_STATUS_CODES[self.rng.gen_range(0..HTTP_STATUS_CODES.len())];
            attrs.push(KeyValue::new("http.status_code", code));
        }
        if self.rng.gen_bool(0.5) {
            let statement = DB_STATEMENTS[self.rng.gen_range(0..DB_STATEMENTS.len())];
            attrs.push(KeyValue::new("db.statement", statement));
        }
        if self.rng.gen_bool(0.5) {
            attrs.push(KeyValue::new("cache.hit", self.rng.gen_bool(0.5)));
        }

        attrs
    }

    fn open_cycle(&mut self, pipelines: &Pipelines) -> (CycleGuard, Option<EmitterError>) {
        match begin_cycle(pipelines.trace(), ROOT_SPAN_NAME) {
            Ok(guard) => (guard, None),
            Err(e) => {
                let context = CorrelationContext::detached(&mut self.rng);
                (CycleGuard::detached(context), Some(e))
            }
        }
    }

    /// Run one emission cycle.
    ///
    /// Never fails: an error on one signal is logged and recorded in the
    /// report, and emission continues with the remaining signals.
    pub async fn run_cycle(&mut self, pipelines: &Pipelines) -> CycleReport {
        let operation = self.next_operation();
        let message = LogMessage::choose(&mut self.rng);

        let (mut guard, open_error) = self.open_cycle(pipelines);
        let mut report = CycleReport {
            operation,
            message,
            context: guard.context().clone(),
            spans_emitted: 0,
            logs_emitted: 0,
            metric_points: 0,
            failures: Vec::new(),
        };
        if let Some(e) = open_error {
            report.record_failure("root span", e);
        }

        let label = operation.label.as_str();
        guard.set_attribute(KeyValue::new("operation", label));

        // Child span covering the simulated work
        let attributes = self.span_attributes(&operation);
        let child = if guard.has_root() {
            match guard.start_child(label) {
                Ok(child) => Some(child),
                Err(e) => {
                    report.record_failure("child span", e);
                    None
                }
            }
        } else {
            None
        };

        tokio::time::sleep(operation.latency()).await;

        if let Some(mut child) = child {
            for attribute in attributes {
                child.set_attribute(attribute);
            }
            child.add_event(message.as_str().to_string(), Vec::new());
            child.set_status(Status::Ok);
            child.end();
            report.spans_emitted += 1;
        }

        // Correlated log record
        let event = SyntheticLogEvent::new(
            message,
            guard.context(),
            &self.identity,
            &self.environment,
        );
        match pipelines.logs().emit(&event) {
            Ok(()) => report.logs_emitted += 1,
            Err(e) => report.record_failure("log record", e),
        }
        if let Some(sink) = pipelines.file_sink()
            && let Err(e) = sink.write(&event)
        {
            report.record_failure("log file", e);
        }

        // Counter and histogram sample
        let metric_attrs = [KeyValue::new("operation", label)];
        match pipelines.metrics().add_request(1, &metric_attrs, guard.context()) {
            Ok(()) => report.metric_points += 1,
            Err(e) => report.record_failure("request count", e),
        }

        let sample = self.rng.gen_range(0..MAX_DURATION_SAMPLE) as f64;
        match pipelines
            .metrics()
            .record_duration(sample, &metric_attrs, guard.context())
        {
            Ok(()) => report.metric_points += 1,
            Err(e) => report.record_failure("request duration", e),
        }

        if guard.has_root() {
            guard.set_status(Status::Ok);
            report.spans_emitted += 1;
        }
        end_cycle(guard);

        info!(
            operation = %label,
            trace_id = %report.context.trace_id(),
            message = %message,
            latency_ms = operation.simulated_latency_ms,
            "Emitted synthetic operation"
        );

        report
    }
}
