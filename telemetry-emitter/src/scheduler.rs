//! Fixed-interval emission loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

use crate::config::EmitterConfig;
use crate::error::Result;
use crate::identity::ResourceIdentity;
use crate::lifecycle::{Pipelines, ShutdownReport};
use crate::logs::FileLogSink;
use crate::pipeline::PipelineFactory;
use crate::stats::EmitterStats;
use crate::workload::WorkloadGenerator;

/// Scheduler lifecycle: `Idle -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl SchedulerState {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed [`Scheduler::run`].
#[derive(Debug)]
pub struct RunSummary {
    pub stats: EmitterStats,
    pub shutdown: ShutdownReport,
}

/// Runs one workload cycle per interval until cancelled, then shuts the
/// pipelines down.
pub struct Scheduler {
    interval: Duration,
    generator: WorkloadGenerator,
    pipelines: Arc<Pipelines>,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(interval: Duration, generator: WorkloadGenerator, pipelines: Arc<Pipelines>) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            interval,
            generator,
            pipelines,
            state,
        }
    }

    /// Start all pipelines and build a scheduler over them.
    ///
    /// Returns an error, and no scheduler, if any pipeline fails to start.
    pub fn from_config(
        config: &EmitterConfig,
        identity: ResourceIdentity,
        factory: &dyn PipelineFactory,
    ) -> Result<Self> {
        let file_sink = config
            .log_sink
            .file
            .as_ref()
            .map(FileLogSink::open)
            .transpose()?;

        let endpoint = config.collector_endpoint();
        let mut pipelines = Pipelines::start(&identity, &endpoint, factory)?;
        if let Some(sink) = file_sink {
            info!(path = %sink.path().display(), "Mirroring log records to file");
            pipelines = pipelines.with_file_sink(sink);
        }
        let generator = WorkloadGenerator::new(identity, config.service.environment.clone());

        Ok(Self::new(
            config.schedule.interval(),
            generator,
            Arc::new(pipelines),
        ))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn pipelines(&self) -> &Arc<Pipelines> {
        &self.pipelines
    }

    /// Watch the scheduler state.
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SchedulerState) {
        debug!(state = %state, "Scheduler state changed");
        self.state.send_replace(state);
    }

    /// Run until `shutdown` becomes `true` or its sender is dropped.
    ///
    /// The first cycle starts one interval after the call. Cancellation is
    /// only observed between cycles, so an in-flight cycle always completes.
    /// The state stays `Stopping` while pipelines flush and close, and turns
    /// `Stopped` once they are shut down.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        let mut stats = EmitterStats::default();

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.set_state(SchedulerState::Running);
        info!(interval_ms = self.interval.as_millis() as u64, "Scheduler running");

        if !*shutdown.borrow_and_update() {
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Shutdown signal received, stopping scheduler");
                            break;
                        }
                    }

                    _ = ticker.tick() => {
                        let report = self.generator.run_cycle(&self.pipelines).await;
                        stats.record(&report);
                        debug!(
                            cycles = stats.cycles,
                            failures = report.failures.len(),
                            "Cycle complete"
                        );
                    }
                }
            }
        }

        self.set_state(SchedulerState::Stopping);

        let pipelines = self.pipelines.clone();
        let shutdown = match tokio::task::spawn_blocking(move || pipelines.shutdown()).await {
            Ok(report) => report,
            Err(e) => {
                error!("Pipeline shutdown task failed: {}", e);
                ShutdownReport::default()
            }
        };

        self.set_state(SchedulerState::Stopped);
        RunSummary { stats, shutdown }
    }
}
