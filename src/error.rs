//! Error types for partition routing.

use crate::types::TenantId;
use thiserror::Error;

/// Result type alias for partition routing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for partition routing.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors. These are fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// The tenant does not exist according to the tenant-info provider.
    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),

    /// A queue update or resolve request carried invalid data.
    #[error("invalid queue {key}: {reason}")]
    InvalidQueue { key: String, reason: String },

    /// Not even the system default queue of a type is registered.
    #[error("queue not registered: {0}")]
    QueueNotFound(String),

    /// Discovery layer errors.
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Member descriptor encoding errors.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error means the tenant is unknown.
    ///
    /// Routing callers use this to short-circuit to "not mine".
    pub fn is_tenant_not_found(&self) -> bool {
        matches!(self, Error::TenantNotFound(_))
    }
}

/// Errors raised by discovery adapters and coordination backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The coordination backend could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The session with the coordination backend is gone.
    #[error("not connected")]
    NotConnected,

    /// Backend rejected or failed an operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// The adapter was used before `start`.
    #[error("discovery not started")]
    NotStarted,

    /// The adapter has been shut down.
    #[error("discovery shut down")]
    Shutdown,
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
