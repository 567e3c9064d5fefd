//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use h1_adapter::config::ServerConfig;
use h1_adapter::http::adapter::Outcome;
use h1_adapter::http::{app_fn, AdapterOptions, Application, Headers, Http1Adapter, HttpServer};
use h1_adapter::lifecycle::Shutdown;
use h1_adapter::net::listener::{Listener, ListenerError};
use h1_adapter::upgrade::UpgradeRegistry;
use h1_adapter::Error;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Run an adapter over one end of an in-memory pipe and return the other.
pub fn spawn_adapter(
    app: Arc<dyn Application>,
    upgrades: UpgradeRegistry,
    options: AdapterOptions,
) -> (DuplexStream, JoinHandle<Result<Outcome, Error>>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let handle = tokio::spawn(async move {
        let mut adapter = Http1Adapter::new(server, options, Arc::new(upgrades));
        adapter.run(app).await
    });
    (client, handle)
}

pub fn spawn_app(app: Arc<dyn Application>) -> (DuplexStream, JoinHandle<Result<Outcome, Error>>) {
    spawn_adapter(app, UpgradeRegistry::new(), AdapterOptions::default())
}

/// Read until the peer closes, bounded by [`TIMEOUT`].
pub async fn read_all(client: &mut DuplexStream) -> String {
    let mut out = Vec::new();
    tokio::time::timeout(TIMEOUT, client.read_to_end(&mut out))
        .await
        .expect("timed out waiting for close")
        .unwrap();
    String::from_utf8(out).unwrap()
}

/// Read until `needle` has appeared `times` times.
pub async fn read_until(client: &mut DuplexStream, needle: &str, times: usize) -> String {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];

    tokio::time::timeout(TIMEOUT, async {
        while String::from_utf8_lossy(&out).matches(needle).count() < times {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "closed early: {:?}", String::from_utf8_lossy(&out));
            out.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .expect("timed out waiting for response");

    String::from_utf8(out).unwrap()
}

/// A request as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// Application that records every request, pulls its body, and answers
/// with the request path.
pub fn recording_app() -> (Arc<dyn Application>, Arc<Mutex<Vec<Seen>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    let app = app_fn(move |conn: &mut Http1Adapter| {
        let log = Arc::clone(&log);
        Box::pin(async move {
            let mut body = Vec::new();
            while let Some(chunk) = conn.get_body_chunk().await {
                body.extend_from_slice(&chunk);
            }

            let (method, path) = {
                let request = conn.request().ok_or(Error::NoActiveRequest)?;
                (request.method().to_string(), request.path().to_string())
            };

            log.lock().unwrap().push(Seen {
                method,
                path: path.clone(),
                body,
            });

            conn.respond(path.as_bytes(), &Headers::new()).await
        })
    });

    let app: Arc<dyn Application> = Arc::new(app);
    (app, seen)
}

/// Start a server on an ephemeral port.
pub async fn start_server(
    mut config: ServerConfig,
    app: Arc<dyn Application>,
    upgrades: UpgradeRegistry,
) -> (SocketAddr, Shutdown, JoinHandle<Result<(), ListenerError>>) {
    config.listener.bind_address = "127.0.0.1:0".to_string();

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, app, upgrades);
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    (addr, shutdown, handle)
}
