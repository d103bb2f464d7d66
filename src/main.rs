//! arcway server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::listener ──▶ http::server ──┬──▶ static file (web root)
//!                (conn limit)     (one request)   ├──▶ HTTP controller (routing)
//!                                                 └──▶ websocket::driver
//!                                                         │
//!                                      ServerContext ◀────┘
//!                            sessions · groups · peers · routes
//! ```
//!
//! Built-in controllers under `/@` are registered by default. Shutdown on
//! Ctrl-C stops accepting and drains open connections.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use arcway::config::{load_config, ServerConfig};
use arcway::net::listener::Listener;
use arcway::observability::{logging, metrics};
use arcway::{HttpServer, ServerBuilder, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "arcway", version, about = "HTTP and WebSocket application server")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `http.web_root`.
    #[arg(short, long)]
    web_root: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(web_root) = cli.web_root {
        config.http.web_root = web_root;
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "arcway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        web_root = %config.http.web_root,
        groups_allowed = config.groups.allow,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let context = ServerBuilder::new(config).with_builtin_controllers().build();

    let shutdown = Shutdown::new();
    shutdown.trigger_on_ctrl_c();

    HttpServer::new(context).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
