//! The query pipeline: cache lookup, generation, validation, execution,
//! formatting, cache store.

use std::sync::Arc;
use std::time::Instant;

use graphmind_core::{
    FormattedResult, QueryRequest, TenantNamespace, ValidationCode, ValidationVerdict,
};
use graphmind_history::{HistoryStore, Outcome, QueryRecord, QueryRecorder};

use crate::cache::QueryCache;
use crate::error::{QueryError, Result};
use crate::executor::GraphExecutor;
use crate::formatter;
use crate::generator::QueryGenerator;
use crate::validator;

/// Longest accepted question, in characters.
pub const MAX_QUESTION_CHARS: usize = 1000;

/// Caller parameters the pipeline understands.
const ACCEPTED_PARAMETERS: [&str; 1] = ["limit"];

/// Orchestrates one question at a time. Cheap to clone; clones share the
/// generator, executor, cache and history store.
#[derive(Clone)]
pub struct QueryEngine {
    generator: Arc<QueryGenerator>,
    executor: Arc<dyn GraphExecutor>,
    cache: QueryCache,
    history: Option<Arc<dyn HistoryStore>>,
}

impl QueryEngine {
    pub fn new(generator: QueryGenerator, executor: Arc<dyn GraphExecutor>, cache: QueryCache) -> Self {
        Self {
            generator: Arc::new(generator),
            executor,
            cache,
            history: None,
        }
    }

    /// Write an audit record for every question.
    pub fn with_history(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn generator(&self) -> &QueryGenerator {
        &self.generator
    }

    /// Answer one question.
    ///
    /// Pipeline: input check → cache lookup → (miss) generate → validate →
    /// execute → format → cache store. A rejected or failed traversal
    /// returns no partial result.
    pub async fn execute_query(&self, request: QueryRequest) -> Result<FormattedResult> {
        let mut recorder =
            QueryRecorder::new(&request.namespace, &request.user_id, &request.question);
        let result = self.run(&request, &mut recorder).await;

        let record = match &result {
            Ok(formatted) => {
                recorder.set_cached(formatted.metadata.cached);
                recorder.set_counts(
                    formatted.metadata.entity_count,
                    formatted.metadata.relationship_count,
                );
                let outcome = if formatted.metadata.cached {
                    Outcome::CacheHit
                } else {
                    Outcome::Success
                };
                recorder.finish(outcome)
            }
            Err(e) => {
                recorder.set_error_code(e.code());
                let outcome = if e.is_validation() {
                    Outcome::Rejected
                } else {
                    Outcome::Failed
                };
                recorder.finish(outcome)
            }
        };
        self.record(record).await;
        result
    }

    async fn run(
        &self,
        request: &QueryRequest,
        recorder: &mut QueryRecorder,
    ) -> Result<FormattedResult> {
        check_input(request)?;
        let namespace = &request.namespace;

        let lookup = Instant::now();
        if let Some(entry) = self
            .cache
            .get(namespace, &request.question, &request.parameters)
            .await
        {
            recorder.set_template(entry.template_used);
            let mut payload = entry.payload;
            payload.metadata.cached = true;
            payload.metadata.execution_time_ms = lookup.elapsed().as_secs_f64() * 1000.0;
            tracing::info!(
                namespace = %namespace,
                template = %entry.template_used,
                entities = payload.metadata.entity_count,
                "Cache hit"
            );
            return Ok(payload);
        }

        let generation = self
            .generator
            .generate(
                &request.question,
                namespace,
                &request.parameters,
                self.executor.as_ref(),
            )
            .await?;
        let query = generation.query;
        recorder.set_query(&query.text, query.template_used);

        let verdict = validator::validate(&query.text, namespace);
        if !verdict.ok {
            let code = verdict
                .error_code
                .unwrap_or(ValidationCode::MissingNamespace);
            tracing::error!(
                namespace = %namespace,
                user_id = %request.user_id,
                code = %code,
                template = %query.template_used,
                query = %query.text,
                "Query rejected by validator"
            );
            return Err(QueryError::Validation {
                code,
                query: query.text,
            });
        }

        // Execution runs on its own task so a caller that goes away does
        // not abandon a connection mid-reply; the result still warms the cache.
        let executor = Arc::clone(&self.executor);
        let cache = self.cache.clone();
        let ns = namespace.clone();
        let question = request.question.clone();
        let caller_params = request.parameters.clone();
        let task = tokio::spawn(async move {
            let started = Instant::now();
            let response = executor
                .run_query(&ns, &query.text, &query.parameters)
                .await?;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            let formatted = formatter::format(&response, query.template_used, elapsed_ms, false);

            tracing::info!(
                namespace = %ns,
                template = %query.template_used,
                rows = response.rows.len(),
                entities = formatted.metadata.entity_count,
                relationships = formatted.metadata.relationship_count,
                server_ms = response.execution_time_ms,
                elapsed_ms,
                "Query executed"
            );

            cache.put(&ns, &question, &caller_params, &formatted).await;
            Ok::<_, QueryError>(formatted)
        });

        task.await
            .map_err(|e| QueryError::Interrupted(e.to_string()))?
    }

    /// Drop every cached result of `namespace`. Called after the tenant's graph changes.
    ///
    /// A backend failure is returned as `CACHE_UNAVAILABLE`, never as zero.
    pub async fn invalidate(&self, namespace: &TenantNamespace) -> Result<u64> {
        Ok(self.cache.invalidate_namespace(namespace).await?)
    }

    /// Run the validator alone, e.g. for operators checking a hand-written query.
    pub fn validate(&self, text: &str, namespace: &TenantNamespace) -> ValidationVerdict {
        validator::validate(text, namespace)
    }

    async fn record(&self, record: QueryRecord) {
        let Some(store) = self.history.clone() else {
            return;
        };
        let id = record.id;
        let saved = tokio::task::spawn_blocking(move || store.save(&record)).await;
        match saved {
            Ok(Ok(())) => tracing::debug!(record_id = %id, "Query history recorded"),
            Ok(Err(e)) => tracing::warn!(record_id = %id, error = %e, "Failed to write query history"),
            Err(e) => tracing::warn!(record_id = %id, error = %e, "Query history task failed"),
        }
    }
}

/// Reject malformed questions and parameters before any generation work.
fn check_input(request: &QueryRequest) -> Result<()> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(QueryError::Input("question is empty".into()));
    }
    let length = request.question.chars().count();
    if length > MAX_QUESTION_CHARS {
        return Err(QueryError::Input(format!(
            "question is {length} characters, maximum is {MAX_QUESTION_CHARS}"
        )));
    }

    for (key, value) in &request.parameters {
        if !ACCEPTED_PARAMETERS.contains(&key.as_str()) {
            return Err(QueryError::Input(format!("unsupported parameter '{key}'")));
        }
        if key == "limit" && !value.as_u64().is_some_and(|n| n > 0) {
            return Err(QueryError::Input(format!(
                "limit must be a positive integer, got {value}"
            )));
        }
    }
    Ok(())
}
