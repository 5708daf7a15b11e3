//! Search Gateway
//!
//! HTTP gateway in front of a search-engine cluster.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌───────────────────────────────────────────────┐
//!                        │                 SEARCH GATEWAY                 │
//!     HTTP request       │  ┌────────┐   ┌─────────┐   ┌──────────────┐  │
//!     ───────────────────┼─▶│  http  │──▶│  cache  │──▶│ load_balancer│  │
//!                        │  │ server │   │middleware│   │  round robin │  │
//!                        │  └────────┘   └─────────┘   └──────┬───────┘  │
//!                        │                                     ▼          │
//!                        │                              ┌──────────────┐  │   [tag, time, envelope]
//!                        │                              │   backend    │──┼──────────────────────▶ Backend
//!                        │                              │  connection  │  │
//!     HTTP response      │                              │  + receiver  │◀─┼────────────────────── engine
//!     ◀──────────────────┼──────────────────────────────│  (replyTo)   │  │   replies (inReplyTo)
//!                        │                              └──────────────┘  │
//!                        │  config · observability · lifecycle            │
//!                        └───────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use search_gateway::config::{load_config, GatewayConfig};
use search_gateway::lifecycle::signals::spawn_signal_handler;
use search_gateway::observability::{init_logging, init_metrics};
use search_gateway::{Gateway, Shutdown};

#[derive(Parser)]
#[command(name = "search-gateway", version)]
#[command(about = "HTTP gateway for a search-engine cluster", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "search-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = config.backend.targets.len(),
        request_timeout_secs = config.http.request_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let gateway = Gateway::build(config).await?;
    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    gateway.serve(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
