mod config;
mod error;
mod gc;
mod health;
mod http;
mod metrics;
mod runtime;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::gc::ImageGcManager;
use crate::metrics::MetricsRegistry;
use crate::runtime::docker::DockerCli;
use crate::runtime::ImageRuntime;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "imagegcd", about = "Node-local container image garbage collector")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/imagegcd/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // ---- Config ----
    let config = config::load_config(&cli.config)?;
    tracing::info!(config_path = %cli.config, "starting imagegcd");

    // ---- Runtime client ----
    let runtime: Arc<dyn ImageRuntime> = Arc::new(DockerCli::new(&config.runtime));

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Image GC manager ----
    let policy = config.image_gc.policy()?;
    let manager = ImageGcManager::new(
        runtime,
        policy,
        config.image_gc.sandbox_image.clone(),
        metrics.clone(),
    )
    .context("failed to create image gc manager")?
    .with_default_root_dir(&config.runtime.default_root_dir);
    manager.set_service_images(config.image_gc.service_images.clone());
    let manager = Arc::new(manager);

    // ---- Spawn services ----
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    if let Some(listen) = config.metrics.listen.clone() {
        let state = http::HttpState {
            manager: Arc::clone(&manager),
            metrics: metrics.clone(),
        };
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = http::run_http_server(&listen, state, rx).await {
                tracing::error!(error = %format!("{e:#}"), "metrics server failed");
            }
        }));
    }

    if config.image_gc.enabled {
        handles.extend(manager.start(shutdown_rx));
    } else {
        tracing::warn!("image garbage collection disabled by configuration");
    }

    // ---- Await shutdown ----
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "background task panicked");
        }
    }

    tracing::info!("imagegcd shut down cleanly");
    Ok(())
}
