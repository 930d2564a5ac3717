//! graphmind-query: Natural-language question to tenant-scoped graph query.
//!
//! A question and a tenant namespace flow through a fixed pipeline:
//! cache lookup → template classification (or generative fallback) with
//! entity resolution → validation → execution on the connection pool →
//! result formatting → cache store. Every query, template-rendered or
//! generated, passes the same validator before it can reach the database.

pub mod cache;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod executor;
pub mod formatter;
pub mod generator;
pub mod model;
pub mod resolver;
pub mod templates;
pub mod validator;

pub use cache::{CacheStore, MemoryCacheStore, QueryCache, RespCacheStore};
pub use config::AppConfig;
pub use directory::{EntityDirectory, MemoryDirectory};
pub use engine::QueryEngine;
pub use error::QueryError;
pub use executor::GraphExecutor;
pub use generator::QueryGenerator;
pub use model::{AnthropicQueryModel, QueryModel};
pub use resolver::{EntityResolver, Resolution, ResolutionStatus};
