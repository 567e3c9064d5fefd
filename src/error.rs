//! Crate-wide error type.
//!
//! Transport failures and malformed input while reading never reach this
//! type: the read loop treats them as end of stream. What remains are write
//! failures, misuse of the response API, upgrade-target failures and
//! application errors.

use thiserror::Error;

/// Boxed error accepted from application and upgrade code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    /// Writing to the connection failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request-scoped operation was called outside of a dispatch.
    #[error("no active request on this connection")]
    NoActiveRequest,

    /// The response API was called out of order.
    #[error("invalid response state: {0}")]
    ResponseState(&'static str),

    /// An upgrade target failed after taking over the connection.
    #[error("upgrade to {protocol} failed: {reason}")]
    Upgrade { protocol: String, reason: String },

    /// Error raised by the application callback.
    #[error("application error: {0}")]
    Application(#[source] BoxError),
}

impl Error {
    /// Wrap an arbitrary application error.
    pub fn application<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Application(err.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
