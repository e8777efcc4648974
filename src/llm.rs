//! LLM gateway client and the [`SqlGenerator`] built on it.
//!
//! The gateway takes `{"messages": [...]}` at `{base_url}{predict_path}` and
//! answers `{"output": "..."}`.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use dbninja_core::generation::{GenerationRequest, SqlGenerator};

use crate::config::ApiConfig;
use crate::http::post_json_with_retry;
use crate::prompt::{build_correction_messages, build_messages, ChatMessage};

pub struct LlmClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl LlmClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.predict_url(),
            api_key: config.api_key(),
            max_retries: config.max_retries,
        })
    }

    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let json = post_json_with_retry(
            &self.client,
            &self.url,
            self.api_key.as_deref(),
            &json!({ "messages": messages }),
            self.max_retries,
            "llm gateway",
        )
        .await?;
        parse_chat_response(&json)
    }
}

pub fn parse_chat_response(json: &Value) -> Result<String> {
    json.get("output")
        .and_then(|o| o.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid llm response: missing output string"))
}

/// Info strings a model puts after an opening fence.
const FENCE_LANGUAGES: &[&str] = &["sql", "mysql", "postgres", "postgresql", "sqlite", "tsql", "plsql"];

/// Strip surrounding whitespace and a Markdown code fence, if any.
pub fn clean_sql(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string (```sql). On a one-line fence it shares the
    // line with the query, so only a known language tag is dropped.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => strip_fence_language(rest),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_string()
}

fn strip_fence_language(line: &str) -> &str {
    match line.split_once(char::is_whitespace) {
        Some((tag, query))
            if FENCE_LANGUAGES
                .iter()
                .any(|lang| tag.eq_ignore_ascii_case(lang)) =>
        {
            query
        }
        _ => line,
    }
}

pub struct LlmSqlGenerator {
    llm: LlmClient,
}

impl LlmSqlGenerator {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl SqlGenerator for LlmSqlGenerator {
    async fn generate(&self, req: &GenerationRequest<'_>) -> Result<String> {
        let output = self.llm.chat(&build_messages(req)).await?;
        Ok(clean_sql(&output))
    }

    async fn generate_with_correction(
        &self,
        req: &GenerationRequest<'_>,
        prior_error: &str,
    ) -> Result<String> {
        let output = self
            .llm
            .chat(&build_correction_messages(req, prior_error))
            .await?;
        Ok(clean_sql(&output))
    }
}
