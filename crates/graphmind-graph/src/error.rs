//! Error types for the graphmind-graph crate.

use thiserror::Error;

use crate::resp::DecodeError;

/// Errors from the connection pool and wire protocol.
#[derive(Debug, Error)]
pub enum PoolError {
    /// All `max_size` connections stayed in use for the whole acquire timeout.
    #[error("Connection pool exhausted: no connection available within {timeout_ms}ms")]
    Exhausted { timeout_ms: u64 },

    /// New connections could not be established after bounded retries.
    #[error("Graph database unavailable: {0}")]
    Unavailable(String),

    /// Authentication was refused by the server. Not retried.
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Malformed bytes or an unexpected reply shape from the server.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected the query itself. The connection stays healthy.
    #[error("Query failed: {0}")]
    Query(String),

    /// A request failed on two different connections.
    #[error("Graph database service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Connection pool is closed")]
    Closed,
}

impl PoolError {
    /// Transport-level failures leave the connection in an unknown state.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Io(_))
    }
}

impl From<DecodeError> for PoolError {
    fn from(e: DecodeError) -> Self {
        Self::Protocol(e.0)
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
