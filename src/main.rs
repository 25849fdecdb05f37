//! Edge image/API forwarding proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                   FORWARDING PROXY                   │
//!                     │                                                      │
//!   GET|POST|OPTIONS  │  ┌───────────┐   ┌────────────┐   ┌──────────────┐   │
//!   /proxy?target=…  ─┼─▶│ preflight │──▶│ allow-list │──▶│ cache-aside  │───┼──▶ Upstream
//!                     │  │  gate     │   │ validator  │   │   fetcher    │◀──┼─── origin
//!                     │  └─────┬─────┘   └─────┬──────┘   └──────┬───────┘   │
//!                     │        │ 204           │ 403             │ 200/…/500 │
//!                     │        ▼               ▼                 ▼           │
//!   Response         ◀┼──────────────── response decorator ◀─────────────────┤
//!                     │               (CORS, nosniff, Vary)                  │
//!                     │                                                      │
//!                     │  cache store · config · observability · lifecycle    │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use edge_image_proxy::config::{load_config, ProxyConfig};
use edge_image_proxy::lifecycle::{shutdown_signal, Shutdown};
use edge_image_proxy::observability::{init_logging, metrics};
use edge_image_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "edge-image-proxy")]
#[command(about = "Allow-listed image/API forwarding proxy with CORS and caching", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Built-in defaults are used when omitted.
    #[arg(short, long, env = "PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    init_logging(&config.observability);
    tracing::info!("edge-image-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        config_file = ?cli.config,
        bind_address = %config.listener.bind_address,
        allowed_prefixes = config.targets.allowed_prefixes.len(),
        cors_mode = ?config.cors.mode,
        cache_enabled = config.cache.enabled,
        upstream_timeout_secs = config.upstream.timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)?;
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        res = &mut server_task => {
            res??;
        }
        _ = shutdown_signal() => {
            shutdown.trigger();
            server_task.await??;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
