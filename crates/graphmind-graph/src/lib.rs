//! GraphMind Graph — FalkorDB wire protocol and connection pool.
//!
//! This crate is the only place that speaks bytes to the graph database.
//! Callers hand it query text and parameters; framing, authentication,
//! connection health, and result-set decoding stay in here.

pub mod client;
pub mod error;
pub mod kv;
pub mod pool;
pub mod queries;
pub mod resp;

pub use client::{ConnectionState, Connector, Credentials, GraphConnection, TcpConnector};
pub use error::PoolError;
pub use kv::KvClient;
pub use pool::{ConnectionPool, PoolConfig, PoolStatus, PooledConnection};
pub use queries::{QueryResponse, Row, SchemaSummary};
