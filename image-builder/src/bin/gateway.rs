//! Image Builder Gateway - HTTP front door for build requests.
//!
//! This binary provides a thin web server that:
//! - Validates incoming build requests
//! - Assigns each one an image id
//! - Enqueues it on the build queue and returns the id
//!
//! The build itself happens asynchronously in the image generator.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use imagebuilder::build::SequenceIdGenerator;
use imagebuilder::{web, AppState, Broker, Config, SubmissionService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("gateway_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        build_queue = %config.build_queue,
        publish_timeout_ms = config.publish_timeout.as_millis() as u64,
        "config_loaded"
    );

    // Startup failures are fatal
    let broker = Broker::connect(&config.amqp_url, config.topology())
        .await
        .context("Failed to initialize message broker")?;

    let service = SubmissionService::new(
        Arc::new(broker.publisher(config.publish_timeout)),
        Arc::new(SequenceIdGenerator::new()),
        config.build_queue.clone(),
    );

    let app = web::router(AppState::new(service));

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "gateway_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    broker.close().await;

    info!("gateway_shutdown_complete");

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

    info!("gateway_shutting_down");
}
