//! ComfyUI gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────┐
//!                         │                     GATEWAY                      │
//!                         │                                                  │
//!     Browser             │  ┌─────────┐    ┌─────────┐    ┌─────────────┐   │
//!     ────────────────────┼─▶│   net   │───▶│  http   │───▶│    proxy    │───┼──▶ Upstream HTTP
//!                         │  │listener │    │ server  │    └─────────────┘   │
//!                         │  └────┬────┘    └────┬────┘    ┌─────────────┐   │
//!                         │       │              └────────▶│  websocket  │◀──┼──▶ Upstream WS
//!                         │       ▼                        │   bridge    │   │
//!                         │  ┌──────────────────────┐      └──────┬──────┘   │
//!                         │  │   session registry   │◀────────────┘          │
//!                         │  └──────────▲───────────┘                        │
//!                         │             │ drain                              │
//!                         │  ┌──────────┴───────────┐                        │
//!                         │  │ lifecycle: signals,  │                        │
//!                         │  │ sequencer, watchdog  │                        │
//!                         │  └──────────────────────┘                        │
//!                         └──────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use comfy_gateway::config::{load_config, validation::validate_config, ConfigError, GatewayConfig};
use comfy_gateway::http::HttpServer;
use comfy_gateway::lifecycle::{
    wait_for_signal, watch_panics, ProcessExit, Shutdown, ShutdownSequencer, Termination,
};
use comfy_gateway::net::Listener;
use comfy_gateway::observability::{logging::init_logging, metrics::init_metrics};
use comfy_gateway::session::Registry;

#[derive(Parser)]
#[command(name = "comfy-gateway")]
#[command(about = "Front door for a ComfyUI upstream", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `upstream.url`.
    #[arg(long)]
    upstream_url: Option<String>,

    /// Override `upstream.ws_url`.
    #[arg(long)]
    upstream_ws_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Some(url) = args.upstream_url {
        config.upstream.url = url;
    }
    if let Some(url) = args.upstream_ws_url {
        config.upstream.ws_url = Some(url);
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    // Dropping the guard flushes and stops the log file writer.
    let _log_guard = init_logging(&config.observability)?;
    let mut panics = watch_panics();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "comfy-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.url,
        upstream_ws = %config.upstream.ws_base(),
        path_prefix = %config.upstream.path_prefix,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        init_metrics(addr)?;
    }

    let registry = Arc::new(Registry::new());
    let shutdown = Shutdown::new();
    let listener = Listener::bind(&config.listener).await?;
    let shutdown_config = config.shutdown.clone();

    let server = HttpServer::new(config, Arc::clone(&registry), shutdown.clone());
    let mut server_task = tokio::spawn(server.run(listener));

    let termination = tokio::select! {
        signal = wait_for_signal() => signal,
        Some(panic) = panics.recv() => Termination::Fault(format!("uncaught panic: {panic}")),
        joined = &mut server_task => match joined {
            Ok(Ok(())) => Termination::Fault("server stopped unexpectedly".to_string()),
            Ok(Err(e)) => Termination::Fault(e.to_string()),
            Err(e) => Termination::Fault(format!("server task panicked: {e}")),
        },
    };
    match &termination {
        Termination::Fault(reason) => tracing::error!(%reason, "Server fault, shutting down"),
        signal => tracing::info!(?signal, "Shutdown signal received"),
    }

    let sequencer = ShutdownSequencer::new(shutdown, registry, shutdown_config, Arc::new(ProcessExit));
    sequencer.run(termination.exit_code()).await;

    Ok(())
}
