//! HTTP/1.x protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept, one task per connection)
//!     → adapter.rs (read loop, dispatch, response framing)
//!         → tokenizer.rs (incremental parse into request events)
//!         → pipeline.rs (requests waiting behind the active one)
//!         → request.rs (request model, headers, pseudo-fields)
//!         → response.rs (status line, headers, body framing)
//!     → Application callback, or an upgrade target
//! ```

pub mod adapter;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;
pub mod tokenizer;

pub use adapter::{app_fn, AdapterOptions, Application, Http1Adapter, Outcome, SendOptions};
pub use request::{HeaderValue, Headers, PseudoField, Request, RequestId, Version};
pub use server::HttpServer;
pub use tokenizer::{HttparseTokenizer, Tokenizer};
