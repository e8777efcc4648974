//! Qdrant REST client serving both retrieval channels.
//!
//! | Channel | Endpoint |
//! |---------|----------|
//! | Semantic | `POST /collections/{c}/points/search` |
//! | Keyword | `POST /collections/{c}/points/scroll` with a full-text `match` on `doc_text` |
//!
//! Point payloads are the serialized [`IndexedDoc`] (flat, discriminated by
//! `object_type`). The point id is the document id.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::info;

use dbninja_core::index::{KeywordIndex, SemanticIndex};
use dbninja_core::models::{IndexedDoc, RetrievalHit};

use crate::config::QdrantConfig;

/// Payload fields that get a Qdrant payload index, with their schema.
const PAYLOAD_INDEXES: &[(&str, &str)] = &[
    ("doc_text", "text"),
    ("table_name", "keyword"),
    ("column_name", "keyword"),
    ("keywords", "keyword"),
];

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    dims: usize,
}

impl QdrantIndex {
    pub fn new(config: &QdrantConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key(),
            dims: config.dims,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let request = match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        };
        let response = request
            .send()
            .await
            .with_context(|| format!("qdrant {} request failed", what))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("qdrant {} error {}: {}", what, status, body_text);
        }
        Ok(response.json().await?)
    }

    /// Create the collection and its payload indexes if it does not exist.
    pub async fn ensure_collection(&self) -> Result<()> {
        let mut request = self.client.get(self.url(""));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        let response = request
            .send()
            .await
            .context("qdrant collection lookup failed")?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status().as_u16() != 404 {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            bail!("qdrant collection lookup error {}: {}", status, body_text);
        }

        info!(collection = %self.collection, dims = self.dims, "creating qdrant collection");
        self.send(
            self.client.put(self.url("")).json(&json!({
                "vectors": { "size": self.dims, "distance": "Cosine" }
            })),
            "create collection",
        )
        .await?;

        for (field, schema) in PAYLOAD_INDEXES {
            self.send(
                self.client
                    .put(self.url("/index?wait=true"))
                    .json(&json!({ "field_name": field, "field_schema": schema })),
                "create payload index",
            )
            .await?;
        }
        Ok(())
    }

    /// Upsert documents with their vectors, waiting for the write to apply.
    pub async fn upsert(&self, docs: &[IndexedDoc], vectors: &[Vec<f32>]) -> Result<()> {
        if docs.len() != vectors.len() {
            bail!(
                "upsert needs one vector per document ({} docs, {} vectors)",
                docs.len(),
                vectors.len()
            );
        }
        let points: Vec<Value> = docs
            .iter()
            .zip(vectors)
            .map(|(doc, vector)| -> Result<Value> {
                Ok(json!({
                    "id": doc.id,
                    "vector": vector,
                    "payload": serde_json::to_value(doc)?,
                }))
            })
            .collect::<Result<_>>()?;

        self.send(
            self.client
                .put(self.url("/points?wait=true"))
                .json(&json!({ "points": points })),
            "upsert",
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SemanticIndex for QdrantIndex {
    async fn semantic_search(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievalHit>> {
        let json = self
            .send(
                self.client.post(self.url("/points/search")).json(&json!({
                    "vector": vector,
                    "limit": limit,
                    "with_payload": true,
                })),
                "search",
            )
            .await?;
        parse_search_response(&json)
    }
}

#[async_trait]
impl KeywordIndex for QdrantIndex {
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<IndexedDoc>> {
        let json = self
            .send(
                self.client.post(self.url("/points/scroll")).json(&json!({
                    "filter": {
                        "must": [{ "key": "doc_text", "match": { "text": query } }]
                    },
                    "limit": limit,
                    "with_payload": true,
                    "with_vector": false,
                })),
                "scroll",
            )
            .await?;
        parse_scroll_response(&json)
    }
}

/// Decode `result[]` of a search response into hits.
pub fn parse_search_response(json: &Value) -> Result<Vec<RetrievalHit>> {
    let points = json
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid qdrant search response: missing result array"))?;

    points
        .iter()
        .map(|p| -> Result<RetrievalHit> {
            let score = p
                .get("score")
                .and_then(|s| s.as_f64())
                .ok_or_else(|| anyhow::anyhow!("Invalid qdrant search response: missing score"))?;
            Ok(RetrievalHit::new(decode_point(p)?, score))
        })
        .collect()
}

/// Decode `result.points[]` of a scroll response into documents.
pub fn parse_scroll_response(json: &Value) -> Result<Vec<IndexedDoc>> {
    let points = json
        .get("result")
        .and_then(|r| r.get("points"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid qdrant scroll response: missing result.points"))?;

    points.iter().map(decode_point).collect()
}

fn decode_point(point: &Value) -> Result<IndexedDoc> {
    let id = match point.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => bail!("Invalid qdrant point: missing id"),
    };
    let mut payload: Map<String, Value> = point
        .get("payload")
        .and_then(|p| p.as_object())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Invalid qdrant point {}: missing payload", id))?;
    payload.insert("id".to_string(), Value::String(id.clone()));

    serde_json::from_value(Value::Object(payload))
        .with_context(|| format!("Invalid payload for qdrant point {}", id))
}
