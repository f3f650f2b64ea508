//! Synthetic telemetry emitter.
//!
//! Fabricates one correlated unit of work per interval and ships it to an
//! OpenTelemetry collector over OTLP: a root span with a child span for the
//! simulated operation, a log record stamped with the root span's trace and
//! span IDs, and a counter increment plus a histogram sample.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐    ┌──────────────────┐    ┌─────────────┐    ┌────────────────┐
//! │ Scheduler │───>│ WorkloadGenerator│───>│  Pipelines  │───>│ OTLP Collector │
//! │ (ticker)  │    │ (one cycle)      │    │ traces/logs │    │ (gRPC / HTTP)  │
//! └───────────┘    └──────────────────┘    │ metrics     │    └────────────────┘
//!                                          └─────────────┘
//! ```
//!
//! Pipelines are injected behind the traits in [`pipeline`]; nothing is
//! registered globally, so several emitters (or the in-memory pipelines in
//! [`memory`]) can run side by side.
//!
//! # Usage
//!
//! ```bash
//! OTEL_COLLECTOR_ENDPOINT=collector.internal:4317 telemetry-emitter
//! ```
//!
//! # Configuration
//!
//! See [`config::EmitterConfig`] for configuration options.

pub mod config;
pub mod correlation;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod logs;
pub mod memory;
pub mod otlp;
pub mod pipeline;
pub mod scheduler;
pub mod stats;
pub mod workload;

pub use config::{CollectorEndpoint, EmitterConfig};
pub use correlation::{CorrelationContext, CycleGuard, begin_cycle, end_cycle};
pub use error::{EmitterError, Result};
pub use identity::ResourceIdentity;
pub use lifecycle::{Pipelines, ShutdownReport};
pub use otlp::OtlpPipelineFactory;
pub use pipeline::{PipelineFactory, SignalKind};
pub use scheduler::{RunSummary, Scheduler, SchedulerState};
pub use stats::EmitterStats;
pub use workload::{CycleReport, WorkloadGenerator};
