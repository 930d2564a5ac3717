//! BLAKE3 content hashing for query records.
//!
//! The hash covers the canonical JSON of every field except the hash itself,
//! so any edit to a stored record is detectable.

use chrono::{DateTime, Utc};
use graphmind_core::{TemplateKind, TenantNamespace};
use serde::Serialize;

use crate::{Outcome, QueryRecord, RecordId};

#[derive(Serialize)]
struct HashableRecord<'a> {
    id: &'a RecordId,
    namespace: &'a TenantNamespace,
    user_id: &'a str,
    question: &'a str,
    query_text: &'a Option<String>,
    template_used: &'a Option<TemplateKind>,
    outcome: &'a Outcome,
    cached: bool,
    execution_time_ms: f64,
    entity_count: usize,
    relationship_count: usize,
    error_code: &'a Option<String>,
    created_at: &'a DateTime<Utc>,
}

/// Compute the hex BLAKE3 hash of a record's content.
pub fn compute_record_hash(record: &QueryRecord) -> String {
    let hashable = HashableRecord {
        id: &record.id,
        namespace: &record.namespace,
        user_id: &record.user_id,
        question: &record.question,
        query_text: &record.query_text,
        template_used: &record.template_used,
        outcome: &record.outcome,
        cached: record.cached,
        execution_time_ms: record.execution_time_ms,
        entity_count: record.entity_count,
        relationship_count: record.relationship_count,
        error_code: &record.error_code,
        created_at: &record.created_at,
    };

    // Plain data with string keys; serialization cannot fail. A failure would
    // still produce a hash that never verifies.
    let json = serde_json::to_vec(&hashable).unwrap_or_default();
    blake3::hash(&json).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueryRecorder;

    fn sample() -> QueryRecord {
        let ns = TenantNamespace::new("alice").unwrap();
        let mut rec = QueryRecorder::new(&ns, "u1", "Who is Sarah?");
        rec.set_query("MATCH (e {namespace: 'alice'}) RETURN e LIMIT 50", TemplateKind::EntityLookup);
        rec.finish(Outcome::Success)
    }

    #[test]
    fn hash_is_deterministic() {
        let record = sample();
        assert_eq!(compute_record_hash(&record), compute_record_hash(&record));
        assert_eq!(compute_record_hash(&record).len(), 64);
    }

    #[test]
    fn hash_changes_with_content() {
        let record = sample();
        let mut edited = record.clone();
        edited.question = "Who is Bob?".into();
        assert_ne!(compute_record_hash(&record), compute_record_hash(&edited));
    }

    #[test]
    fn hash_ignores_stored_hash() {
        let record = sample();
        let mut edited = record.clone();
        edited.content_hash = Some("bogus".into());
        assert_eq!(compute_record_hash(&record), compute_record_hash(&edited));
    }
}
