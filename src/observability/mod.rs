//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! adapter + server produce:
//!     → logging.rs (structured log events, per-connection spans)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Connection and request IDs are carried as span/event fields
//! - Metrics are cheap (atomic increments behind the facade)

pub mod logging;
pub mod metrics;
