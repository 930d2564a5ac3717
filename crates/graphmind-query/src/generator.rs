//! Question → parameterized graph query.
//!
//! Template first: classify, extract mentions, resolve them concurrently,
//! render. When no template matches with enough confidence, the generative
//! model is asked instead and its output gets the tenant clause and a LIMIT
//! injected. Either way the validator has the final word.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use graphmind_core::{
    GeneratedQuery, QueryParams, TemplateKind, TenantNamespace, MAX_RESULT_LIMIT,
};
use serde_json::Value;

use crate::config::GeneratorConfig;
use crate::error::{QueryError, Result};
use crate::executor::GraphExecutor;
use crate::model::{clean_model_output, ModelRequest, QueryModel};
use crate::resolver::{EntityResolver, Resolution, ResolutionStatus};
use crate::templates::{self, Classification, RenderInput};
use crate::validator::{limit_positions, namespace_clauses, tokenize, NAMESPACE_PROPERTY};

/// Confidence multiplier when a template needs a mention and none was found.
const MISSING_MENTION_PENALTY: f64 = 0.5;

/// A generated query plus how its mentions were resolved.
#[derive(Debug, Clone)]
pub struct Generation {
    pub query: GeneratedQuery,
    pub resolutions: Vec<Resolution>,
    pub confidence: f64,
}

pub struct QueryGenerator {
    config: GeneratorConfig,
    resolver: Arc<EntityResolver>,
    model: Option<Arc<dyn QueryModel>>,
}

impl QueryGenerator {
    pub fn new(config: GeneratorConfig, resolver: Arc<EntityResolver>) -> Self {
        Self {
            config,
            resolver,
            model: None,
        }
    }

    /// Enable the generative fallback.
    pub fn with_model(mut self, model: Arc<dyn QueryModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// The template a question maps to, with mention-aware confidence.
    /// `None` means the fallback path.
    pub fn select_template(&self, question: &str) -> Option<Classification> {
        let mentions = templates::extract_mentions(question);
        self.accept(templates::classify(question)?, !mentions.is_empty())
    }

    fn accept(&self, mut c: Classification, has_mentions: bool) -> Option<Classification> {
        let needs_mention = match c.kind {
            TemplateKind::EntityLookup => true,
            TemplateKind::RelationshipQuery => c.relationship_type.is_none(),
            _ => false,
        };
        if needs_mention && !has_mentions {
            c.confidence *= MISSING_MENTION_PENALTY;
        }
        (c.confidence >= self.config.confidence_threshold).then_some(c)
    }

    /// Produce a query for `question` in `namespace`.
    ///
    /// `executor` is only consulted for the schema summary on the fallback path.
    pub async fn generate(
        &self,
        question: &str,
        namespace: &TenantNamespace,
        params: &QueryParams,
        executor: &dyn GraphExecutor,
    ) -> Result<Generation> {
        let mentions = templates::extract_mentions(question);
        let classification = templates::classify(question)
            .and_then(|c| self.accept(c, !mentions.is_empty()));

        let Some(classification) = classification else {
            return self.fallback(question, namespace, executor).await;
        };

        let resolutions = self.resolve_mentions(&mentions, namespace).await;
        let names: Vec<String> = resolutions
            .iter()
            .take(2)
            .map(|r| r.canonical_name.clone())
            .collect();
        if names.is_empty() && templates::requires_name(classification.kind) {
            tracing::info!(
                namespace = %namespace,
                template = %classification.kind,
                "Template needs a name but the question has none; using fallback"
            );
            return self.fallback(question, namespace, executor).await;
        }

        let label = match classification.kind {
            TemplateKind::EntityLookup => resolutions
                .first()
                .and_then(|r| r.entity_type.as_deref())
                .and_then(templates::allowed_label)
                .or(classification.label),
            _ => classification.label,
        };

        let (text, parameters) = templates::render(&RenderInput {
            kind: classification.kind,
            namespace,
            label,
            relationship_type: classification.relationship_type,
            names: &names,
            period: classification.period,
            limit: self.limit_for(classification.kind, params),
            now: Utc::now(),
        });

        tracing::info!(
            namespace = %namespace,
            template = %classification.kind,
            confidence = classification.confidence,
            mentions = mentions.len(),
            resolved = resolutions.iter().filter(|r| r.is_resolved()).count(),
            "Template selected"
        );

        Ok(Generation {
            query: GeneratedQuery {
                text,
                parameters,
                template_used: classification.kind,
                namespace: namespace.clone(),
            },
            resolutions,
            confidence: classification.confidence,
        })
    }

    /// Resolve every mention concurrently. Directory failures leave the
    /// mention unresolved rather than failing generation.
    async fn resolve_mentions(
        &self,
        mentions: &[String],
        namespace: &TenantNamespace,
    ) -> Vec<Resolution> {
        let results = join_all(mentions.iter().map(|m| self.resolver.resolve(m, namespace))).await;
        results
            .into_iter()
            .zip(mentions)
            .map(|(result, mention)| match result {
                Ok(resolution) => resolution,
                Err(e) => {
                    tracing::warn!(
                        namespace = %namespace,
                        mention = %mention,
                        error = %e,
                        "Entity directory lookup failed; using mention as-is"
                    );
                    Resolution {
                        mention: mention.clone(),
                        canonical_name: mention.clone(),
                        entity_id: None,
                        entity_type: None,
                        score: 0.0,
                        status: ResolutionStatus::Unresolved,
                    }
                }
            })
            .collect()
    }

    fn limit_for(&self, kind: TemplateKind, params: &QueryParams) -> u32 {
        let max = self.config.effective_max_limit();
        let base = match kind {
            TemplateKind::CountQuery => return 1,
            TemplateKind::ListQuery => self.config.list_limit,
            _ => self.config.default_limit,
        };
        let requested = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l.min(u64::from(u32::MAX)) as u32);
        requested.unwrap_or(base).clamp(1, max)
    }

    async fn fallback(
        &self,
        question: &str,
        namespace: &TenantNamespace,
        executor: &dyn GraphExecutor,
    ) -> Result<Generation> {
        let Some(model) = &self.model else {
            tracing::info!(namespace = %namespace, "No template matched and no model is configured");
            return Err(QueryError::GenerationUnavailable);
        };

        let schema = match executor.schema_summary(namespace).await {
            Ok(schema) => schema,
            Err(e) => {
                tracing::warn!(namespace = %namespace, error = %e, "Schema summary unavailable");
                Default::default()
            }
        };

        let raw = model
            .generate_query(&ModelRequest {
                question: question.to_string(),
                namespace: namespace.clone(),
                schema,
            })
            .await?;
        let text = prepare_untrusted(&raw, namespace);

        tracing::info!(
            namespace = %namespace,
            model = model.model_name(),
            "Generative fallback used"
        );

        Ok(Generation {
            query: GeneratedQuery {
                text,
                parameters: QueryParams::new(),
                template_used: TemplateKind::Generative,
                namespace: namespace.clone(),
            },
            resolutions: Vec::new(),
            confidence: 0.0,
        })
    }
}

/// Clean model output, then inject the tenant clause (when absent) into the
/// first `MATCH` node pattern and a `LIMIT` (when absent) at the end.
///
/// Nothing is removed or repaired: whatever else the text contains is left
/// for the validator to judge.
pub fn prepare_untrusted(raw: &str, namespace: &TenantNamespace) -> String {
    let mut text = clean_model_output(raw);

    if namespace_clauses(&tokenize(&text)).is_empty() {
        if let Some(injected) = inject_namespace(&text, namespace) {
            text = injected;
        }
    }

    if limit_positions(&tokenize(&text)).is_empty() {
        text = format!("{text} LIMIT {MAX_RESULT_LIMIT}");
    }

    text
}

fn inject_namespace(text: &str, namespace: &TenantNamespace) -> Option<String> {
    let tokens = tokenize(text);
    let match_at = tokens
        .iter()
        .position(|t| t.ident().is_some_and(|w| w.eq_ignore_ascii_case("MATCH")))?;
    let open = (match_at + 1..tokens.len()).find(|&i| tokens[i].is_punct('('))?;

    let mut depth = 0usize;
    for i in open..tokens.len() {
        let tok = &tokens[i];
        if tok.is_punct('(') {
            depth += 1;
        } else if tok.is_punct(')') {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                let clause = format!(" {{{NAMESPACE_PROPERTY}: '{namespace}'}}");
                return Some(splice(text, tok.start, &clause));
            }
        } else if tok.is_punct('{') && depth == 1 {
            let empty_map = tokens.get(i + 1).is_some_and(|n| n.is_punct('}'));
            let entry = if empty_map {
                format!("{NAMESPACE_PROPERTY}: '{namespace}'")
            } else {
                format!("{NAMESPACE_PROPERTY}: '{namespace}', ")
            };
            return Some(splice(text, tok.end, &entry));
        }
    }
    None
}

fn splice(text: &str, at: usize, insert: &str) -> String {
    let mut out = String::with_capacity(text.len() + insert.len());
    out.push_str(&text[..at]);
    out.push_str(insert);
    out.push_str(&text[at..]);
    out
}
