//! C4 — LLM SQL Generator. Renders a prompt from the intent and a static
//! schema summary, calls an OpenAI-compatible chat completion endpoint (the
//! same shape as `services/llm/client.rs`), and parses the response as a
//! SQL Artifact — with a single repair pass for malformed JSON.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{GenerationError, SqlGenerator};
use crate::config::LlmConfig;
use crate::models::{Intent, SqlArtifact, SqlSource};

const SCHEMA_SUMMARY: &str = "\
Tables:
  customers(id, name, region, created_at)
  customer_memos(id, customer_id, body, created_at)
  customer_products(id, customer_id, product_name, amount, region, created_at)
  users(id, name, email)
  events(id, user_id, kind, occurred_at)";

pub struct LlmSqlGenerator {
    http_client: Client,
    config: LlmConfig,
}

impl LlmSqlGenerator {
    pub fn new(config: LlmConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build the LLM HTTP client");
        Self { http_client, config }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You translate natural-language questions about a customer/memo dataset into a \
             single read-only SQL query.\n\n{}\n\nRules:\n1. Only SELECT or WITH statements.\n\
             2. Only reference the tables above.\n3. Bind every value as a %(name)s placeholder, \
             never inline literals.\n4. Always include a LIMIT of 100 or fewer.\n\
             Respond with JSON only: {{\"sql\": string, \"parameters\": object, \"explanation\": \
             string, \"confidence\"?: number}}",
            SCHEMA_SUMMARY
        )
    }

    async fn call_provider(&self, intent: &Intent) -> Result<LlmSqlResponse, GenerationError> {
        if self.config.api_key.is_empty() {
            return Err(GenerationError::LlmUnavailable("no API key configured".to_string()));
        }

        let user_prompt = serde_json::to_string_pretty(intent)
            .map_err(|e| GenerationError::LlmMalformed(e.to_string()))?;

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: self.system_prompt() },
                ChatMessage { role: "user".to_string(), content: user_prompt },
            ],
            temperature: 0.0,
            response_format: ResponseFormat { r#type: "json_object".to_string() },
        };

        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));

        tracing::debug!(url = %url, model = %self.config.model, "calling LLM sql generator");

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::LlmTimeout
                } else {
                    GenerationError::LlmUnavailable(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::LlmTimeout);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::LlmUnavailable(format!("{}: {}", status, text)));
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(|e| GenerationError::LlmMalformed(e.to_string()))?;

        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| GenerationError::LlmMalformed("empty LLM response".to_string()))?;

        parse_llm_response(content)
    }
}

/// Attempts strict JSON parse; on failure, repairs by extracting the first
/// balanced `{…}` block and retrying once.
fn parse_llm_response(content: &str) -> Result<LlmSqlResponse, GenerationError> {
    match serde_json::from_str::<LlmSqlResponse>(content) {
        Ok(parsed) => Ok(parsed),
        Err(first_err) => {
            let repaired = extract_balanced_braces(content)
                .ok_or_else(|| GenerationError::LlmMalformed(first_err.to_string()))?;
            serde_json::from_str::<LlmSqlResponse>(&repaired)
                .map_err(|e| GenerationError::LlmMalformed(e.to_string()))
        },
    }
}

fn extract_balanced_braces(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let mut depth = 0usize;
    for (offset, ch) in content[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + offset + ch.len_utf8()].to_string());
                }
            },
            _ => {},
        }
    }
    None
}

#[async_trait]
impl SqlGenerator for LlmSqlGenerator {
    async fn generate(&self, intent: &Intent) -> Result<SqlArtifact, GenerationError> {
        let parsed = self.call_provider(intent).await?;
        Ok(SqlArtifact {
            sql: parsed.sql,
            parameters: parsed.parameters,
            explanation: parsed.explanation,
            confidence: parsed.confidence.unwrap_or(0.7),
            source: SqlSource::Llm,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LlmSqlResponse {
    sql: String,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    explanation: String,
    confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repairs_json_trailed_by_prose() {
        let content = r#"Sure, here it is: {"sql": "SELECT 1", "parameters": {}, "explanation": "x"} -- done"#;
        let parsed = parse_llm_response(content).unwrap();
        assert_eq!(parsed.sql, "SELECT 1");
    }

    #[test]
    fn truly_malformed_content_is_malformed() {
        let result = parse_llm_response("not json at all");
        assert!(matches!(result, Err(GenerationError::LlmMalformed(_))));
    }
}
