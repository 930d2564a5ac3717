//! Error types for the graphmind-query crate.

use graphmind_core::{GraphmindError, ValidationCode};
use graphmind_graph::PoolError;
use thiserror::Error;

use crate::cache::CacheError;

#[derive(Error, Debug)]
pub enum QueryError {
    /// Malformed question, namespace, or parameters. Rejected before generation.
    #[error("Invalid input: {0}")]
    Input(String),

    /// The validator refused the query. Never retried.
    #[error("Query rejected ({code}): {query}")]
    Validation { code: ValidationCode, query: String },

    #[error("No generative model configured for questions outside the template catalog")]
    GenerationUnavailable,

    #[error("Generative model failed: {0}")]
    Generation(String),

    #[error("Graph error: {0}")]
    Pool(#[from] PoolError),

    /// Only invalidation surfaces cache failures; reads and writes fail open.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Query execution was interrupted: {0}")]
    Interrupted(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueryError {
    /// Stable code reported upstream.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Input(_) | Self::Serialization(_) => "INPUT",
            Self::Validation { code, .. } => code.as_str(),
            Self::GenerationUnavailable | Self::Generation(_) => "GENERATION_UNAVAILABLE",
            Self::Pool(e) => match e {
                PoolError::Exhausted { .. } => "POOL_EXHAUSTED",
                PoolError::Unavailable(_) | PoolError::Auth(_) | PoolError::Closed => {
                    "POOL_UNAVAILABLE"
                }
                PoolError::Protocol(_) | PoolError::Io(_) => "PROTOCOL",
                PoolError::Query(_) => "QUERY_FAILED",
                PoolError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            },
            Self::Cache(_) => "CACHE_UNAVAILABLE",
            Self::Interrupted(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Transient failures a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            "POOL_EXHAUSTED"
                | "POOL_UNAVAILABLE"
                | "PROTOCOL"
                | "SERVICE_UNAVAILABLE"
                | "CACHE_UNAVAILABLE"
        ) && !matches!(self, Self::Pool(PoolError::Auth(_)) | Self::Pool(PoolError::Closed))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

impl From<GraphmindError> for QueryError {
    fn from(e: GraphmindError) -> Self {
        Self::Input(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let rejected = QueryError::Validation {
            code: ValidationCode::DestructiveOperation,
            query: "MATCH (n) DELETE n".into(),
        };
        assert_eq!(rejected.code(), "DESTRUCTIVE_OPERATION");
        assert!(!rejected.is_retryable());
        assert!(rejected.is_validation());

        let exhausted = QueryError::Pool(PoolError::Exhausted { timeout_ms: 10 });
        assert_eq!(exhausted.code(), "POOL_EXHAUSTED");
        assert!(exhausted.is_retryable());

        let failed = QueryError::Pool(PoolError::Query("syntax".into()));
        assert_eq!(failed.code(), "QUERY_FAILED");
        assert!(!failed.is_retryable());

        let protocol = QueryError::Pool(PoolError::Protocol("bad".into()));
        assert_eq!(protocol.code(), "PROTOCOL");
        assert!(protocol.is_retryable());

        assert_eq!(QueryError::GenerationUnavailable.code(), "GENERATION_UNAVAILABLE");
        assert_eq!(QueryError::Input("empty".into()).code(), "INPUT");
    }

    #[test]
    fn test_auth_is_not_retryable() {
        let auth = QueryError::Pool(PoolError::Auth("WRONGPASS".into()));
        assert_eq!(auth.code(), "POOL_UNAVAILABLE");
        assert!(!auth.is_retryable());
    }

    #[test]
    fn test_cache_failure_code() {
        let err = QueryError::from(CacheError::Backend(PoolError::Unavailable("down".into())));
        assert_eq!(err.code(), "CACHE_UNAVAILABLE");
        assert!(err.is_retryable());
    }
}
