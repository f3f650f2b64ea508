//! Integration tests for the telemetry emitter.
//!
//! These drive the scheduler and workload through the in-memory pipelines.
//! Note: exporting to a live collector requires external services.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use telemetry_emitter::config::{
    COLLECTOR_ENDPOINT_ENV, CollectorEndpoint, OtlpProtocol, TRACE_INTERVAL_ENV, TlsMode,
};
use telemetry_emitter::logs::LogMessage;
use telemetry_emitter::memory::{
    MemoryLogPipeline, MemoryMetricPipeline, MemoryPipelineFactory, MemoryTracePipeline,
};
use telemetry_emitter::pipeline::{PipelineFactory, SignalPipeline};
use telemetry_emitter::workload::OperationLabel;
use telemetry_emitter::{
    EmitterConfig, EmitterError, OtlpPipelineFactory, Pipelines, ResourceIdentity, Scheduler,
    SignalKind, WorkloadGenerator,
};

fn identity() -> ResourceIdentity {
    ResourceIdentity::resolve(&Default::default()).unwrap()
}

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

// =============================================================================
// Correlation Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_thousand_cycles_are_correlated_and_uniform() {
    let trace = Arc::new(MemoryTracePipeline::new());
    let metrics = Arc::new(MemoryMetricPipeline::new());
    let logs = Arc::new(MemoryLogPipeline::new());
    let pipelines = Pipelines::new(trace.clone(), metrics.clone(), logs.clone());
    let mut generator = WorkloadGenerator::with_seed(identity(), "production", 1234);

    let mut label_counts: HashMap<OperationLabel, u32> = HashMap::new();
    let mut message_counts: HashMap<LogMessage, u32> = HashMap::new();
    let mut contexts = Vec::new();

    for _ in 0..1000 {
        let report = generator.run_cycle(&pipelines).await;
        assert!(report.failures.is_empty());
        *label_counts.entry(report.operation.label).or_default() += 1;
        *message_counts.entry(report.message).or_default() += 1;
        contexts.push(report.context);
    }

    for label in OperationLabel::ALL {
        let count = label_counts.get(&label).copied().unwrap_or(0);
        assert!(
            (190..=310).contains(&count),
            "{} selected {} times out of 1000",
            label,
            count
        );
    }
    assert_eq!(message_counts.len(), LogMessage::ALL.len());

    let roots: HashMap<String, String> = trace
        .finished_spans()
        .into_iter()
        .filter(|s| s.is_root())
        .map(|s| (s.trace_id, s.span_id))
        .collect();
    assert_eq!(roots.len(), 1000);

    let events = logs.events();
    assert_eq!(events.len(), 1000);
    for (event, context) in events.iter().zip(&contexts) {
        let trace_id = event.trace_id().unwrap();
        let span_id = event.span_id().unwrap();
        assert!(!trace_id.is_empty());
        assert!(!span_id.is_empty());
        assert_eq!(trace_id, context.trace_id());
        assert_eq!(span_id, context.span_id());
        assert_eq!(roots.get(trace_id).map(String::as_str), Some(span_id));
    }

    assert_eq!(metrics.request_total(), 1000);
    assert_eq!(trace.max_open_roots(), 1);
}

// =============================================================================
// Scheduler Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_overrunning_cycles_never_overlap() {
    let mut config = EmitterConfig::default();
    config.schedule.interval_ms = 100;

    let factory = MemoryPipelineFactory::new();
    let scheduler = Scheduler::from_config(&config, identity(), &factory).unwrap();

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.run(rx));

    tokio::time::sleep(Duration::from_secs(20)).await;
    tx.send(true).unwrap();
    let summary = handle.await.unwrap();

    let trace = factory.trace().unwrap();
    assert!(summary.stats.cycles > 1);
    assert!(summary.stats.cycles < 200);
    assert_eq!(trace.max_open_roots(), 1);
    assert_eq!(trace.open_roots(), 0);
    assert_eq!(summary.stats.logs_emitted, summary.stats.cycles);
    assert!(summary.shutdown.is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_lets_in_flight_cycle_finish() {
    let mut config = EmitterConfig::default();
    config.schedule.interval_ms = 50;

    let factory = MemoryPipelineFactory::new();
    let scheduler = Scheduler::from_config(&config, identity(), &factory).unwrap();

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.run(rx));

    // Land inside the first cycle's simulated latency
    tokio::time::sleep(Duration::from_millis(51)).await;
    tx.send(true).unwrap();
    let summary = handle.await.unwrap();

    let trace = factory.trace().unwrap();
    assert_eq!(trace.open_roots(), 0);
    assert_eq!(
        trace.finished_spans().iter().filter(|s| s.is_root()).count() as u64,
        summary.stats.cycles
    );
    assert_eq!(factory.logs().unwrap().events().len() as u64, summary.stats.cycles);
}

#[tokio::test(start_paused = true)]
async fn test_failing_log_pipeline_keeps_traces_and_metrics() {
    let mut config = EmitterConfig::default();
    config.schedule.interval_ms = 1000;

    let factory = MemoryPipelineFactory::new();
    let scheduler = Scheduler::from_config(&config, identity(), &factory).unwrap();
    factory.logs().unwrap().set_failing(true);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.run(rx));

    tokio::time::sleep(Duration::from_millis(5_600)).await;
    tx.send(true).unwrap();
    let summary = handle.await.unwrap();

    assert!(summary.stats.cycles >= 3);
    assert_eq!(summary.stats.logs_emitted, 0);
    assert_eq!(summary.stats.emission_errors, summary.stats.cycles);
    assert_eq!(summary.stats.spans_emitted, summary.stats.cycles * 2);
    assert_eq!(summary.stats.metric_points, summary.stats.cycles * 2);
    assert_eq!(factory.metrics().unwrap().request_total(), summary.stats.cycles);
}

#[tokio::test(start_paused = true)]
async fn test_configured_file_sink_mirrors_every_log_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sink").join("emitter.jsonl");

    let mut config = EmitterConfig::default();
    config.schedule.interval_ms = 1000;
    config.log_sink.file = Some(path.clone());

    let factory = MemoryPipelineFactory::new();
    let scheduler = Scheduler::from_config(&config, identity(), &factory).unwrap();

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.run(rx));

    tokio::time::sleep(Duration::from_millis(3_600)).await;
    tx.send(true).unwrap();
    let summary = handle.await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(summary.stats.logs_emitted >= 2);
    assert_eq!(content.lines().count() as u64, summary.stats.logs_emitted);
    assert_eq!(summary.stats.emission_errors, 0);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_construction_failure_prevents_scheduler() {
    for signal in SignalKind::ALL {
        let factory = MemoryPipelineFactory::new().fail_on(signal);
        let err = Scheduler::from_config(&EmitterConfig::default(), identity(), &factory)
            .err()
            .unwrap();

        assert!(matches!(err, EmitterError::ExporterConstruction { .. }));
        assert!(err.is_fatal());

        if let Some(trace) = factory.trace() {
            assert!(trace.is_shut_down());
        }
    }
}

#[test]
fn test_unavailable_file_sink_is_fatal_before_pipelines_start() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("occupied");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let mut config = EmitterConfig::default();
    config.log_sink.file = Some(blocker.join("emitter.jsonl"));

    let factory = MemoryPipelineFactory::new();
    let err = Scheduler::from_config(&config, identity(), &factory)
        .err()
        .unwrap();

    assert!(matches!(err, EmitterError::LogSink { .. }));
    assert!(err.is_fatal());
    assert!(factory.endpoints().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_twice_has_no_side_effects() {
    let factory = MemoryPipelineFactory::new();
    let scheduler = Scheduler::from_config(&EmitterConfig::default(), identity(), &factory).unwrap();
    let pipelines = scheduler.pipelines().clone();

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let summary = scheduler.run(rx).await;
    assert!(!summary.shutdown.already_shut_down);

    let again = pipelines.shutdown();
    assert!(again.already_shut_down);
    assert!(again.is_clean());

    for calls in [
        factory.trace().unwrap().shutdown_calls(),
        factory.metrics().unwrap().shutdown_calls(),
        factory.logs().unwrap().shutdown_calls(),
    ] {
        assert_eq!(calls, 1);
    }
}

// =============================================================================
// Endpoint Tests
// =============================================================================

#[test]
fn test_endpoint_override_reaches_all_pipelines() {
    let mut config = EmitterConfig::default();
    config.apply_overrides_from(env(&[(COLLECTOR_ENDPOINT_ENV, "collector.internal:4317")]));

    let factory = MemoryPipelineFactory::new();
    Scheduler::from_config(&config, identity(), &factory).unwrap();

    let endpoints = factory.endpoints();
    assert_eq!(endpoints.len(), 3);
    for (_, endpoint) in &endpoints {
        assert_eq!(endpoint.endpoint, "collector.internal:4317");
        assert_eq!(endpoint.url(), "http://collector.internal:4317");
    }
}

#[test]
fn test_default_endpoint_without_override() {
    let mut config = EmitterConfig::default();
    config.apply_overrides_from(env(&[(COLLECTOR_ENDPOINT_ENV, ""), (TRACE_INTERVAL_ENV, "abc")]));

    let factory = MemoryPipelineFactory::new();
    let scheduler = Scheduler::from_config(&config, identity(), &factory).unwrap();

    assert_eq!(scheduler.interval(), Duration::from_secs(5));
    for (_, endpoint) in factory.endpoints() {
        assert_eq!(endpoint.url(), "http://localhost:4317");
    }
}

#[test]
fn test_http_signal_urls() {
    let endpoint = CollectorEndpoint::new("collector.internal:4318", TlsMode::Secure);

    assert_eq!(
        endpoint.signal_url(OtlpProtocol::Http, SignalKind::Traces),
        "https://collector.internal:4318/v1/traces"
    );
    assert_eq!(
        endpoint.signal_url(OtlpProtocol::Grpc, SignalKind::Logs),
        "https://collector.internal:4318"
    );
}

#[tokio::test]
async fn test_malformed_endpoint_fails_construction() {
    let config = EmitterConfig::default();
    let factory = OtlpPipelineFactory::new(&config);
    let endpoint = CollectorEndpoint::new("http://bad host:4317", TlsMode::Insecure);

    let err = factory.trace_pipeline(&endpoint, &identity()).err().unwrap();
    assert!(matches!(
        err,
        EmitterError::ExporterConstruction { signal: SignalKind::Traces, .. }
    ));
}

#[test]
fn test_identity_differs_between_resolutions() {
    let first = identity();
    let second = identity();

    assert_eq!(first.instance_id().len(), 32);
    assert!(first.instance_id().chars().all(|c| c.is_ascii_hexdigit()));
    assert_ne!(first.instance_id(), second.instance_id());
}
