//! graphmind-core: Shared types, configuration, and error handling for the GraphMind query core.
//!
//! This crate provides the foundational types used across all GraphMind components:
//! - Tenant namespaces and the canonical entity directory records
//! - Generated queries, validation verdicts, and the formatted result payload
//! - Layered configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use error::GraphmindError;
pub use types::{
    CanonicalEntity, Entity, FormattedResult, GeneratedQuery, QueryParams, QueryRequest,
    Relationship, ResultMetadata, TemplateKind, TenantNamespace, ValidationCode,
    ValidationVerdict, MAX_RESULT_LIMIT,
};
