//! Model Manager - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use model_manager::{ModelManager, api, config::ManagerConfig, metrics};
use std::path::PathBuf;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "model-manager")]
#[command(about = "Lifecycle manager for local transformer models", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override API port
    #[arg(long)]
    port: Option<u16>,

    /// Override models directory
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Disable GPU detection and accelerator devices
    #[arg(long)]
    no_gpu: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting Model Manager");

    let mut config = ManagerConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.api_port = port;
    }
    if let Some(models_dir) = cli.models_dir {
        config.models_dir = models_dir;
    }
    if cli.no_gpu {
        config.enable_gpu = false;
    }

    config.validate()?;

    tracing::info!(
        api_port = config.api_port,
        models_dir = ?config.models_dir,
        registry_cache = ?config.registry_cache_path(),
        max_loaded_models = config.max_loaded_models,
        enable_gpu = config.enable_gpu,
        "Configuration loaded"
    );

    let prometheus_handle = metrics::setup_metrics()?;

    let manager = ModelManager::builder()
        .build(config.clone())
        .await
        .context("Failed to initialize model manager")?;

    manager.spawn_sweeper().await;

    let state = api::AppState {
        manager,
        prometheus_handle,
    };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    let grace = std::time::Duration::from_secs(config.graceful_shutdown_timeout_secs);
    api::serve(listener, state, shutdown_signal(), grace)
        .await
        .context("API server error")?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
