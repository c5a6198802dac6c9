//! Image Generator - RabbitMQ worker that processes build requests.
//!
//! Polls the build queue one request at a time and runs the build routine
//! for each. Stops polling on SIGINT/SIGTERM once the current build is done.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{signal, sync::watch};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use imagebuilder::{Broker, BuildWorker, Config, StubBuildRoutine, WorkerSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("image_generator_starting");

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        build_queue = %config.build_queue,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        backoff_max_ms = config.backoff_max.as_millis() as u64,
        build_duration_ms = config.build_duration.as_millis() as u64,
        "config_loaded"
    );

    // Startup failures are fatal
    let broker = Broker::connect(&config.amqp_url, config.topology())
        .await
        .context("Failed to initialize message broker")?;

    let worker = BuildWorker::new(
        Arc::new(broker.consumer(config.drain_idle)),
        Arc::new(StubBuildRoutine::new(config.build_duration)),
        WorkerSettings {
            queue: config.build_queue.clone(),
            poll_interval: config.poll_interval,
            backoff_max: config.backoff_max,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!("image_generator_ready");

    worker.run(shutdown_rx).await;

    broker.close().await;

    info!("image_generator_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("image_generator_stopping");
}
