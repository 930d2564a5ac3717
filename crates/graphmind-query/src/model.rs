//! Generative-text client for questions outside the template catalog.
//!
//! The model's output is untrusted: it is cleaned up here, then goes
//! through the same validator as template output.

use std::time::Duration;

use async_trait::async_trait;
use graphmind_core::{TenantNamespace, MAX_RESULT_LIMIT};
use graphmind_graph::SchemaSummary;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::{QueryError, Result};

const API_VERSION: &str = "2023-06-01";

/// Longest wait between two model requests.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// What the model is told about one question.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub question: String,
    pub namespace: TenantNamespace,
    pub schema: SchemaSummary,
}

impl ModelRequest {
    pub fn system_prompt(&self) -> String {
        format!(
            "You translate questions about a personal knowledge graph into one read-only \
             Cypher query for FalkorDB.\n\
             Rules:\n\
             - Output only the query, no explanation.\n\
             - Never write data: no CREATE, MERGE, SET, DELETE, REMOVE or DROP.\n\
             - The first node pattern must carry {{namespace: '{ns}'}} and no other node may.\n\
             - End with exactly one LIMIT no greater than {max}.\n\n\
             Schema:\n{schema}",
            ns = self.namespace,
            max = MAX_RESULT_LIMIT,
            schema = self.schema.describe(),
        )
    }
}

/// Produces raw query text for a question.
#[async_trait]
pub trait QueryModel: Send + Sync {
    async fn generate_query(&self, request: &ModelRequest) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

/// Anthropic Messages API client.
pub struct AnthropicQueryModel {
    config: ModelConfig,
    client: Client,
}

impl AnthropicQueryModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(QueryError::GenerationUnavailable);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| QueryError::Generation(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    async fn send_with_retry(&self, request: &ModelRequest) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            match self.try_request(request).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if attempt < self.config.max_retries {
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_attempts = self.config.max_retries + 1,
                            error = %e,
                            "Model request failed, retrying"
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| QueryError::Generation("all retry attempts failed".into())))
    }

    async fn try_request(&self, request: &ModelRequest) -> Result<String> {
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: 0.0,
            system: request.system_prompt(),
            messages: vec![Message {
                role: "user",
                content: &request.question,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryError::Generation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(QueryError::Generation(format!(
                "model API error ({status}): {error_text}"
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| QueryError::Generation(format!("unparseable model response: {e}")))?;

        Ok(parsed
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl QueryModel for AnthropicQueryModel {
    async fn generate_query(&self, request: &ModelRequest) -> Result<String> {
        let started = std::time::Instant::now();
        let text = self.send_with_retry(request).await?;
        tracing::info!(
            namespace = %request.namespace,
            model = %self.config.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generative fallback produced a query"
        );
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Strip markdown code fences, surrounding whitespace, and trailing `;`.
pub fn clean_model_output(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string (e.g. `cypher`) on the fence line.
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        text = text.trim_end();
        text = text.strip_suffix("```").unwrap_or(text);
    }
    text.trim().trim_end_matches(';').trim_end().to_string()
}

/// 500ms, 1s, 2s, ... capped at [`MAX_BACKOFF`] for any retry count.
fn backoff_delay(attempt: u32) -> Duration {
    let millis = 500u64.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    Duration::from_millis(millis).min(MAX_BACKOFF)
}
