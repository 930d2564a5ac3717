//! Builder that fills in a [`QueryRecord`] as the pipeline advances.
//!
//! ```no_run
//! # use graphmind_history::{Outcome, QueryRecorder};
//! # use graphmind_core::{TemplateKind, TenantNamespace};
//! let ns = TenantNamespace::new("alice").unwrap();
//! let mut rec = QueryRecorder::new(&ns, "user-1", "Who is Sarah?");
//! rec.set_query("MATCH (e:Person {namespace: 'alice'}) RETURN e LIMIT 50", TemplateKind::EntityLookup);
//! rec.set_counts(1, 0);
//! let record = rec.finish(Outcome::Success);
//! assert!(record.verify_integrity());
//! ```

use std::time::Instant;

use chrono::Utc;
use graphmind_core::{TemplateKind, TenantNamespace};

use crate::{Outcome, QueryRecord, RecordId};

pub struct QueryRecorder {
    record: QueryRecord,
    started: Instant,
}

impl QueryRecorder {
    pub fn new(namespace: &TenantNamespace, user_id: &str, question: &str) -> Self {
        Self {
            record: QueryRecord {
                id: RecordId::new(),
                namespace: namespace.clone(),
                user_id: user_id.to_string(),
                question: question.to_string(),
                query_text: None,
                template_used: None,
                outcome: Outcome::Failed,
                cached: false,
                execution_time_ms: 0.0,
                entity_count: 0,
                relationship_count: 0,
                error_code: None,
                created_at: Utc::now(),
                content_hash: None,
            },
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> RecordId {
        self.record.id
    }

    pub fn set_query(&mut self, text: &str, template: TemplateKind) {
        self.record.query_text = Some(text.to_string());
        self.record.template_used = Some(template);
    }

    pub fn set_template(&mut self, template: TemplateKind) {
        self.record.template_used = Some(template);
    }

    pub fn set_cached(&mut self, cached: bool) {
        self.record.cached = cached;
    }

    pub fn set_counts(&mut self, entities: usize, relationships: usize) {
        self.record.entity_count = entities;
        self.record.relationship_count = relationships;
    }

    pub fn set_error_code(&mut self, code: &str) {
        self.record.error_code = Some(code.to_string());
    }

    /// Stamp the outcome and elapsed time, then seal the record with its hash.
    pub fn finish(mut self, outcome: Outcome) -> QueryRecord {
        self.record.outcome = outcome;
        self.record.execution_time_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let hash = self.record.compute_hash();
        self.record.content_hash = Some(hash);
        self.record
    }
}
