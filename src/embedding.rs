//! HTTP embedding provider.
//!
//! Calls the gateway's embeddings endpoint (`POST {base_url}{embeddings_path}`)
//! with an OpenAI-compatible body and decodes `data[].embedding`.
//!
//! ```json
//! { "input": ["text", ...], "model": "optional-model-name" }
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use dbninja_core::embedding::Embedder;

use crate::config::ApiConfig;
use crate::http::post_json_with_retry;

pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: Option<String>,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.embeddings_url(),
            api_key: config.api_key(),
            model: config.embedding_model.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut body = serde_json::json!({ "input": texts });
        if let Some(model) = &self.model {
            body["model"] = Value::String(model.clone());
        }

        let json = post_json_with_retry(
            &self.client,
            &self.url,
            self.api_key.as_deref(),
            &body,
            self.max_retries,
            "embedding gateway",
        )
        .await?;

        let vectors = parse_embeddings_response(&json)?;
        if vectors.len() != texts.len() {
            bail!(
                "embedding gateway returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
pub fn parse_embeddings_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: non-numeric value"))
            })
            .collect::<Result<_>>()?;

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
