//! Protocol upgrade subsystem.
//!
//! # Data Flow
//! ```text
//! request with `Upgrade: <token>` reaches the pipeline head
//!     → UpgradeRegistry::resolve(token)
//!         1. handler registered for the token → UpgradeHandler
//!         2. token is `h2c` and an H2Adapter is set → H2Adapter
//!         3. otherwise → None (request dispatched normally)
//!     → adapter releases tokenizer + pipeline
//!     → RawConnection (socket + buffered bytes) handed to the target
//! ```
//!
//! # Design Decisions
//! - Tokens are matched lowercased and trimmed
//! - The target owns the connection from then on and is responsible for
//!   closing it
//! - An unresolvable Upgrade header is not an error

pub mod websocket;

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::Error;
use crate::http::adapter::{AdapterOptions, Application};
use crate::http::request::{Headers, PseudoField};
use crate::net::io::RawConnection;

pub use websocket::WebSocketUpgrade;

/// Upgrade token for cleartext HTTP/2.
pub const H2C_TOKEN: &str = "h2c";

/// Takes over a connection for a registered upgrade token.
pub trait UpgradeHandler: Send + Sync {
    /// `headers` are the upgrade request's headers as received.
    fn upgrade(&self, conn: RawConnection, headers: Headers) -> BoxFuture<'static, Result<(), Error>>;
}

/// Newer HTTP version reached through `Upgrade: h2c`.
///
/// Takes over the read loop entirely, including any requests pipelined
/// behind the upgrade request.
pub trait H2Adapter: Send + Sync {
    fn serve(
        &self,
        conn: RawConnection,
        options: AdapterOptions,
        headers: Headers,
        app: Arc<dyn Application>,
    ) -> BoxFuture<'static, Result<(), Error>>;
}

/// Adapts an async closure into an [`UpgradeHandler`].
pub struct UpgradeFn<F>(F);

pub fn upgrade_fn<F, Fut>(f: F) -> UpgradeFn<F>
where
    F: Fn(RawConnection, Headers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    UpgradeFn(f)
}

impl<F, Fut> UpgradeHandler for UpgradeFn<F>
where
    F: Fn(RawConnection, Headers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn upgrade(&self, conn: RawConnection, headers: Headers) -> BoxFuture<'static, Result<(), Error>> {
        Box::pin((self.0)(conn, headers))
    }
}

/// A resolved upgrade destination.
#[derive(Clone)]
pub enum UpgradeTarget {
    Handler {
        protocol: String,
        handler: Arc<dyn UpgradeHandler>,
    },
    H2c(Arc<dyn H2Adapter>),
}

impl UpgradeTarget {
    pub fn protocol(&self) -> &str {
        match self {
            UpgradeTarget::Handler { protocol, .. } => protocol,
            UpgradeTarget::H2c(_) => H2C_TOKEN,
        }
    }
}

impl std::fmt::Debug for UpgradeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UpgradeTarget({})", self.protocol())
    }
}

/// Upgrade handlers keyed by lowercase protocol token.
#[derive(Clone, Default)]
pub struct UpgradeRegistry {
    handlers: HashMap<String, Arc<dyn UpgradeHandler>>,
    h2: Option<Arc<dyn H2Adapter>>,
}

impl UpgradeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `token` (case-insensitive).
    pub fn register<H>(mut self, token: &str, handler: H) -> Self
    where
        H: UpgradeHandler + 'static,
    {
        self.handlers
            .insert(normalize(token), Arc::new(handler) as Arc<dyn UpgradeHandler>);
        self
    }

    pub fn with_h2<A>(mut self, adapter: A) -> Self
    where
        A: H2Adapter + 'static,
    {
        self.h2 = Some(Arc::new(adapter));
        self
    }

    pub fn resolve(&self, token: &str) -> Option<UpgradeTarget> {
        let token = normalize(token);

        if let Some(handler) = self.handlers.get(&token) {
            return Some(UpgradeTarget::Handler {
                protocol: token,
                handler: Arc::clone(handler),
            });
        }

        if token == H2C_TOKEN {
            return self.h2.clone().map(UpgradeTarget::H2c);
        }

        None
    }

    /// Registered tokens, for startup logging.
    pub fn protocols(&self) -> Vec<&str> {
        let mut protocols: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        if self.h2.is_some() {
            protocols.push(H2C_TOKEN);
        }
        protocols.sort_unstable();
        protocols
    }
}

impl std::fmt::Debug for UpgradeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

fn normalize(token: &str) -> String {
    token.trim().to_ascii_lowercase()
}

/// Headers for the h2c hand-off: the original set plus `:scheme` (always
/// `http`) and `:authority` copied from Host.
pub fn h2c_headers(original: &Headers) -> Headers {
    let mut headers = original.clone();
    headers.set_pseudo(PseudoField::Scheme, "http");

    if let Some(host) = original.get("host") {
        headers.set_pseudo(PseudoField::Authority, host);
    }

    headers
}
