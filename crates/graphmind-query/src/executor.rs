//! The engine's view of the graph database.

use async_trait::async_trait;
use graphmind_core::{QueryParams, TenantNamespace};
use graphmind_graph::{ConnectionPool, PoolError, QueryResponse, SchemaSummary};

/// Runs validated read queries and reports the tenant graph's schema.
///
/// Implemented by [`ConnectionPool`]; tests substitute in-memory fakes.
#[async_trait]
pub trait GraphExecutor: Send + Sync + 'static {
    async fn run_query(
        &self,
        namespace: &TenantNamespace,
        text: &str,
        params: &QueryParams,
    ) -> Result<QueryResponse, PoolError>;

    async fn schema_summary(&self, namespace: &TenantNamespace) -> Result<SchemaSummary, PoolError>;
}

#[async_trait]
impl GraphExecutor for ConnectionPool {
    async fn run_query(
        &self,
        namespace: &TenantNamespace,
        text: &str,
        params: &QueryParams,
    ) -> Result<QueryResponse, PoolError> {
        ConnectionPool::run_query(self, namespace, text, params).await
    }

    async fn schema_summary(&self, namespace: &TenantNamespace) -> Result<SchemaSummary, PoolError> {
        ConnectionPool::schema_summary(self, namespace).await
    }
}
