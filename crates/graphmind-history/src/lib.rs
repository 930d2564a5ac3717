//! GraphMind History — tamper-evident query audit trail.
//!
//! Every question that passes through the query engine leaves one
//! [`QueryRecord`]: what was asked, which query ran (if any), how it ended,
//! and how long it took. Records are content-hashed with BLAKE3 so edits to
//! a stored record are detectable, and they are stored per namespace so an
//! audit read can never cross tenants.

pub mod hash;
pub mod recorder;
pub mod store;

use chrono::{DateTime, Utc};
use graphmind_core::{TemplateKind, TenantNamespace};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use recorder::QueryRecorder;
pub use store::{FileHistoryStore, HistoryError, HistoryQuery, HistoryStore, MemoryHistoryStore};

/// Unique identifier for a query record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a pipeline traversal ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Served from the cache without touching the pool.
    CacheHit,
    /// Executed and formatted.
    Success,
    /// Blocked by the validator.
    Rejected,
    /// Failed anywhere else (input, generation, pool).
    Failed,
}

/// One audit row for one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRecord {
    pub id: RecordId,
    pub namespace: TenantNamespace,
    pub user_id: String,
    pub question: String,
    /// Query text that was validated, absent when generation never produced one.
    pub query_text: Option<String>,
    pub template_used: Option<TemplateKind>,
    pub outcome: Outcome,
    pub cached: bool,
    pub execution_time_ms: f64,
    pub entity_count: usize,
    pub relationship_count: usize,
    /// Stable error code for rejected or failed traversals.
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    /// BLAKE3 content hash (hex), set by [`QueryRecorder::finish`].
    pub content_hash: Option<String>,
}

impl QueryRecord {
    /// BLAKE3 hash over every field except `content_hash`.
    pub fn compute_hash(&self) -> String {
        hash::compute_record_hash(self)
    }

    /// True when the stored hash matches the content.
    pub fn verify_integrity(&self) -> bool {
        match &self.content_hash {
            Some(stored) => stored == &self.compute_hash(),
            None => false,
        }
    }
}
