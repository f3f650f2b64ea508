//! Synthetic telemetry emitter binary.

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use telemetry_emitter::{EmitterConfig, OtlpPipelineFactory, ResourceIdentity, Scheduler};

/// Emit correlated synthetic traces, logs and metrics to an OTLP collector.
#[derive(Parser, Debug)]
#[command(name = "telemetry-emitter")]
#[command(about = "Emit correlated synthetic telemetry via OpenTelemetry OTLP")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error). Overrides config.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        EmitterConfig::load_from_file(config_path)?
    } else {
        EmitterConfig::default()
    };

    // Initialize logging
    let logging = match args.log_level {
        Some(level) => config.logging.with_level(level),
        None => config.logging.clone(),
    };
    emitter_common::init_tracing(&logging)?;

    config.apply_env_overrides();
    config.validate()?;

    info!("Starting synthetic telemetry emitter");

    let identity = ResourceIdentity::resolve(&config.service)?;
    let endpoint = config.collector_endpoint();
    info!(
        service = %identity.service_name(),
        version = %identity.service_version(),
        instance_id = %identity.instance_id(),
        endpoint = %endpoint.url(),
        protocol = ?config.collector.protocol,
        interval_ms = config.schedule.interval_ms,
        "Configuration loaded"
    );

    let factory = OtlpPipelineFactory::new(&config);
    let scheduler = match Scheduler::from_config(&config, identity, &factory) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Failed to start telemetry pipelines: {}", e);
            return Err(e.into());
        }
    };

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    wait_for_termination().await;

    // Signal shutdown; the in-flight cycle completes before pipelines close
    shutdown_tx.send(true)?;

    let summary = scheduler_task.await?;
    for failure in &summary.shutdown.failures {
        warn!("Shutdown error: {}", failure);
    }

    let stats = summary.stats;
    info!(
        cycles = stats.cycles,
        spans_emitted = stats.spans_emitted,
        logs_emitted = stats.logs_emitted,
        metric_points = stats.metric_points,
        emission_errors = stats.emission_errors,
        "Final statistics"
    );

    info!("Emitter stopped");
    Ok(())
}

async fn wait_for_termination() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(e) => error!("Failed to listen for Ctrl+C: {}, shutting down...", e),
            }
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
