//! HTTP/1 adapter server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──TCP──▶ net::listener ──▶ http::server ──▶ http::adapter ──▶ Echo app
//!                                                             │
//!                                                   Upgrade: websocket
//!                                                             ▼
//!                                                  upgrade::websocket (echo)
//! ```
//!
//! The bundled application answers every request with a JSON description of
//! it: method, path, query, headers and the body it read.

use clap::Parser;
use futures_util::future::BoxFuture;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use h1_adapter::config::{load_config, ServerConfig};
use h1_adapter::http::{Application, Headers, Http1Adapter, HttpServer};
use h1_adapter::lifecycle::{wait_for_signal, Shutdown};
use h1_adapter::net::listener::Listener;
use h1_adapter::observability::{logging, metrics};
use h1_adapter::upgrade::{websocket, UpgradeRegistry, WebSocketUpgrade};
use h1_adapter::Error;

#[derive(Parser)]
#[command(name = "h1-adapter")]
#[command(about = "HTTP/1.x server with pipelining and protocol upgrades", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<String>,
}

struct Echo;

impl Application for Echo {
    fn call<'a>(&'a self, conn: &'a mut Http1Adapter) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(echo(conn))
    }
}

async fn echo(conn: &mut Http1Adapter) -> Result<(), Error> {
    let mut body = Vec::new();
    while let Some(chunk) = conn.get_body_chunk().await {
        body.extend_from_slice(&chunk);
    }

    let request = conn.request().ok_or(Error::NoActiveRequest)?;
    let headers: serde_json::Map<String, serde_json::Value> = request
        .headers()
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), json!(value)))
        .collect();

    let description = json!({
        "id": request.id().to_string(),
        "method": request.method(),
        "path": request.path(),
        "query": request.query(),
        "version": request.version().to_string(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    });

    let out = serde_json::to_vec_pretty(&description).map_err(Error::application)?;
    let headers = Headers::new().with("Content-Type", "application/json");

    conn.respond(&out, &headers).await
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

    logging::init_logging(&config.observability);

    tracing::info!("h1-adapter v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        idle_timeout_secs = config.timeouts.idle_secs,
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

    let listener = Listener::bind(&config.listener).await?;

    let upgrades = UpgradeRegistry::new().register(
        "websocket",
        WebSocketUpgrade::new(|ws, _headers| websocket::echo(ws)),
    );

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, Arc::new(Echo), upgrades);
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    wait_for_signal().await;
    shutdown.trigger();

    server_task.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
