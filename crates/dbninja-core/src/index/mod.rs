//! Index abstraction for schema documents.
//!
//! Retrieval runs two independent channels, each behind its own trait so a
//! backend may serve one or both:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`SemanticIndex`] | Nearest-neighbour search over document vectors |
//! | [`KeywordIndex`] | Full-text match over document text |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{IndexedDoc, RetrievalHit};

/// Vector similarity search.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Return at most `limit` hits ranked by similarity, each carrying the
    /// backend's raw similarity score.
    async fn semantic_search(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievalHit>>;
}

/// Full-text keyword search.
///
/// Returns matching documents only. Relevance is recomputed by the
/// retriever with [`keyword_score`](crate::ranking::keyword_score), so
/// backends are not asked for a rank.
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<IndexedDoc>>;
}
