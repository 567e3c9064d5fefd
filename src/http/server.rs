//! HTTP/1 server.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Run one adapter per connection on its own task
//! - Track open connections and drain them on shutdown
//!
//! # Shutdown
//! ```text
//! shutdown signal
//!     → stop accepting
//!     → wait up to shutdown_grace for connections to finish
//!     → interrupt whatever is still running
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::http::adapter::{AdapterOptions, Application, Http1Adapter, Outcome};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::upgrade::UpgradeRegistry;

pub struct HttpServer {
    config: ServerConfig,
    app: Arc<dyn Application>,
    upgrades: Arc<UpgradeRegistry>,
    tracker: ConnectionTracker,
}

impl HttpServer {
    pub fn new(config: ServerConfig, app: Arc<dyn Application>, upgrades: UpgradeRegistry) -> Self {
        Self {
            config,
            app,
            upgrades: Arc::new(upgrades),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Open connections, including ones owned by upgrade targets.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %addr,
            upgrades = ?self.upgrades.protocols(),
            "HTTP server starting"
        );

        let options = self.config.adapter_options();
        let (interrupt_tx, _) = broadcast::channel::<()>(1);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        self.spawn_connection(stream, peer, permit, options.clone(), interrupt_tx.subscribe());
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                    Err(e) => return Err(e),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }

        drop(listener);

        let grace = self.config.timeouts.shutdown_grace();
        let open = self.tracker.active_count();
        if open > 0 {
            tracing::info!(open, ?grace, "Waiting for connections to finish");
        }

        if !self.tracker.wait_for_drain_timeout(grace).await {
            tracing::warn!(
                open = self.tracker.active_count(),
                "Grace period elapsed, interrupting connections"
            );
            let _ = interrupt_tx.send(());
            self.tracker.wait_for_drain().await;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
        options: AdapterOptions,
        mut interrupt: broadcast::Receiver<()>,
    ) {
        let guard = self.tracker.track();
        let app = Arc::clone(&self.app);
        let upgrades = Arc::clone(&self.upgrades);
        let span = tracing::info_span!("connection", id = %guard.id(), peer = %peer);

        tokio::spawn(
            async move {
                // both released when the task ends, upgraded or not
                let _permit = permit;
                let mut adapter = Http1Adapter::new(stream, options, upgrades).with_id(guard.id());

                let interrupted = tokio::select! {
                    result = adapter.run(app) => {
                        match result {
                            Ok(Outcome::Closed) => tracing::debug!("Connection closed"),
                            Ok(Outcome::Upgraded) => tracing::debug!("Upgraded connection finished"),
                            Err(e) => tracing::warn!(error = %e, "Connection failed"),
                        }
                        false
                    }
                    _ = interrupt.recv() => true,
                };

                if interrupted {
                    adapter.interrupt().await;
                }

                drop(guard);
            }
            .instrument(span),
        );
    }
}
