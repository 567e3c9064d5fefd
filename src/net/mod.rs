//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (ID + lifetime tracking)
//!     → io.rs (type-erased stream) → HTTP/1 adapter
//!
//! On upgrade:
//!     adapter → io.rs RawConnection (stream + buffered bytes) → upgrade target
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod io;
pub mod listener;
