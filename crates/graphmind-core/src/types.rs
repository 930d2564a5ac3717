//! Core domain types for the GraphMind query pipeline.
//!
//! These types cross crate boundaries: the pool speaks in terms of
//! `TenantNamespace`, the generator produces `GeneratedQuery`, and every
//! pipeline traversal ends in a `FormattedResult`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GraphmindError;

/// Upper bound on `LIMIT` for any query that reaches the graph database.
pub const MAX_RESULT_LIMIT: u32 = 200;

const MAX_NAMESPACE_LEN: usize = 64;

// ── Tenant ────────────────────────────────────────────────────────

/// Opaque identifier for one tenant's isolated graph partition.
///
/// Restricted to `[A-Za-z0-9_-]{1,64}` so it can be embedded as a quoted
/// literal in query text and as a segment of cache keys without escaping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct TenantNamespace(String);

impl TenantNamespace {
    pub fn new(raw: impl Into<String>) -> Result<Self, GraphmindError> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > MAX_NAMESPACE_LEN {
            return Err(GraphmindError::InvalidNamespace(format!(
                "namespace must be 1-{MAX_NAMESPACE_LEN} characters, got {}",
                raw.len()
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(GraphmindError::InvalidNamespace(format!(
                "namespace {raw:?} contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantNamespace {
    type Error = GraphmindError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantNamespace> for String {
    fn from(ns: TenantNamespace) -> Self {
        ns.0
    }
}

impl fmt::Display for TenantNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantNamespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── Entity Directory ──────────────────────────────────────────────

/// The authoritative name/type record for a real-world thing in a tenant's graph.
///
/// Maintained by the ingestion subsystem; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

// ── Templates & Generated Queries ─────────────────────────────────

/// Which catalog template (or the generative fallback) produced a query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    EntityLookup,
    RelationshipQuery,
    TemporalQuery,
    ListQuery,
    CountQuery,
    Generative,
}

impl TemplateKind {
    /// The fixed, versioned template catalog (excludes the fallback).
    pub const CATALOG: [TemplateKind; 5] = [
        TemplateKind::EntityLookup,
        TemplateKind::RelationshipQuery,
        TemplateKind::TemporalQuery,
        TemplateKind::ListQuery,
        TemplateKind::CountQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityLookup => "entity_lookup",
            Self::RelationshipQuery => "relationship_query",
            Self::TemporalQuery => "temporal_query",
            Self::ListQuery => "list_query",
            Self::CountQuery => "count_query",
            Self::Generative => "generative",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named query parameters. Ordered so encoding and hashing are deterministic.
pub type QueryParams = BTreeMap<String, serde_json::Value>;

/// A parameterized graph query ready for validation.
///
/// `text` embeds exactly `namespace` and carries every user-supplied value
/// through `parameters` (labels and limits excepted, from fixed allow-lists).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedQuery {
    pub text: String,
    pub parameters: QueryParams,
    pub template_used: TemplateKind,
    pub namespace: TenantNamespace,
}

// ── Validation ────────────────────────────────────────────────────

/// Reasons a query is rejected before it may reach the pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    MissingNamespace,
    DestructiveOperation,
    UnboundedQuery,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingNamespace => "MISSING_NAMESPACE",
            Self::DestructiveOperation => "DESTRUCTIVE_OPERATION",
            Self::UnboundedQuery => "UNBOUNDED_QUERY",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of validation: cleared or rejected, never repaired.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub ok: bool,
    pub error_code: Option<ValidationCode>,
}

impl ValidationVerdict {
    pub fn cleared() -> Self {
        Self {
            ok: true,
            error_code: None,
        }
    }

    pub fn rejected(code: ValidationCode) -> Self {
        Self {
            ok: false,
            error_code: Some(code),
        }
    }
}

// ── Requests & Results ────────────────────────────────────────────

/// One question from the upstream session layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub namespace: TenantNamespace,
    pub user_id: String,
    /// Caller hints (e.g. `limit`). Part of the cache key.
    #[serde(default)]
    pub parameters: QueryParams,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>, namespace: TenantNamespace, user_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            namespace,
            user_id: user_id.into(),
            parameters: QueryParams::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }
}

/// A de-duplicated entity in a formatted result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A relationship whose endpoints are ids present in the same result's entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Cache and telemetry metadata attached to every result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultMetadata {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub execution_time_ms: f64,
    pub cached: bool,
    pub template_used: TemplateKind,
    /// Integer result of a counting query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    /// Rows of bare scalars, e.g. `RETURN avg(p.age) AS avg_age`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Canonical entity/relationship/metadata payload returned upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormattedResult {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub metadata: ResultMetadata,
}
