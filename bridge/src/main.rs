use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use config_manager::BridgeConfig;
use hls_server::HlsState;
use stream_lifecycle::{FfmpegSpawner, LifecycleManager};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// RTSP to HLS bridge
///
/// - Accepts an RTSP source over the control API
/// - Runs a single ffmpeg transcoder writing HLS segments
/// - Serves the playlist and segments to browsers
#[derive(Parser)]
#[command(name = "rtsp-bridge")]
#[command(about = "Relay an RTSP camera to browsers as HLS")]
struct Cli {
    /// Config file (defaults to the XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    bind: Option<String>,

    /// Directory the HLS output is written under
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = load_config(&cli)?;

    match hls_server::check_dependencies(&config.stream.ffmpeg_path).await {
        Ok(version) => info!("Using {}", version),
        Err(e) => warn!("{}; streams will fail to start", e),
    }

    let manager = Arc::new(LifecycleManager::new(&config, Arc::new(FfmpegSpawner)));
    let state = Arc::new(HlsState::new(&config, manager));
    let app = hls_server::routes::router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;
    info!("Listening on http://{}", config.server.bind_address);
    info!("HLS output directory: {}", state.hls_dir().display());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, stopping transcoder");
    state.shutdown().await;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None if BridgeConfig::exists() => BridgeConfig::load()?,
        None => BridgeConfig::default(),
    };
    config.apply_env_overrides();

    if let Some(bind) = &cli.bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(dir) = &cli.static_dir {
        config.server.static_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
