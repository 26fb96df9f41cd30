//! Pipeline Cache - admin server
//!
//! Runs the caching layer over an in-memory store and serves its admin
//! endpoints.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline_cache::api::create_router;
use pipeline_cache::domain::{PipelineIdentifier, StageResult, StageState};
use pipeline_cache::{spawn_warmup_task, AppState, Config, StatusEvent};

/// Main entry point for the admin server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Wire the cache, DAOs and lock manager over an in-memory store
/// 4. Seed demo data and start the cache warm-up
/// 5. Start HTTP server on configured port
/// 6. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting pipeline cache");

    let config = Config::from_env();
    info!(
        "Configuration loaded: port={}, warmup_on_start={}, generation_stripes={}, seed_demo_data={}",
        config.admin_port, config.warmup_on_start, config.generation_stripes, config.seed_demo_data
    );

    let state = AppState::in_memory(&config);

    if config.seed_demo_data {
        let seeding = state.clone();
        tokio::task::spawn_blocking(move || seed_demo_data(&seeding))
            .await
            .context("demo data task failed")?
            .context("failed to seed demo data")?;
    }

    let warmup = config
        .warmup_on_start
        .then(|| spawn_warmup_task(state.pipelines.clone()));

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.admin_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Admin server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("admin server failed")?;

    if let Some(handle) = warmup {
        handle.abort();
    }
    info!("Server shutdown complete");
    Ok(())
}

/// One locked pipeline run with a building stage.
fn seed_demo_data(state: &AppState) -> pipeline_cache::Result<()> {
    let run = PipelineIdentifier::new("demo", 1, "1");
    let pipeline_id = state.pipelines.save(&run)?;
    let stage = state
        .stages
        .save(pipeline_id, "build", StageState::Building, StageResult::Unknown)?;
    state.listeners.dispatch(&StatusEvent::StageStatusChanged(stage));
    state.locks.lock(&run.name, &run)?;
    info!("Seeded demo pipeline {}/{}", run.name, run.counter);
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
