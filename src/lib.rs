//! HTTP/1.x connection adapter.
//!
//! Parses HTTP/1.0 and HTTP/1.1 requests off a byte stream, dispatches them
//! one at a time to an application callback, frames the responses, and hands
//! the connection to an upgrade target (WebSocket, h2c) when asked.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod upgrade;

pub use config::ServerConfig;
pub use error::{BoxError, Error, Result};
pub use http::{app_fn, AdapterOptions, Application, Headers, Http1Adapter, HttpServer, SendOptions};
pub use lifecycle::Shutdown;
pub use upgrade::{UpgradeHandler, UpgradeRegistry};
