//! In-memory index implementing both retrieval channels.
//!
//! Vector search is brute-force cosine similarity over all stored vectors.
//! Keyword search returns every document whose lower-cased text contains at
//! least one query term, in insertion order. Used by tests and for small
//! offline corpora.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{IndexedDoc, RetrievalHit};

use super::{KeywordIndex, SemanticIndex};

struct StoredDoc {
    doc: IndexedDoc,
    vector: Vec<f32>,
}

/// In-memory index for tests and small corpora.
pub struct InMemoryIndex {
    docs: RwLock<Vec<StoredDoc>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
        }
    }

    /// Insert a document, replacing any existing one with the same id.
    pub fn upsert(&self, doc: IndexedDoc, vector: Vec<f32>) {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.retain(|sd| sd.doc.id != doc.id);
        docs.push(StoredDoc { doc, vector });
    }

    pub fn len(&self) -> usize {
        self.docs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SemanticIndex for InMemoryIndex {
    async fn semantic_search(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievalHit>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<RetrievalHit> = docs
            .iter()
            .map(|sd| RetrievalHit::new(sd.doc.clone(), cosine_similarity(vector, &sd.vector) as f64))
            .collect();
        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl KeywordIndex for InMemoryIndex {
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<IndexedDoc>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs
            .iter()
            .filter(|sd| {
                let text_lower = sd.doc.doc_text.to_lowercase();
                terms.iter().any(|t| text_lower.contains(t))
            })
            .take(limit)
            .map(|sd| sd.doc.clone())
            .collect())
    }
}
