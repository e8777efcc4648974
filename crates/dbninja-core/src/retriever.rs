//! Hybrid retrieval over semantic and keyword channels.
//!
//! # Fusion Algorithm
//!
//! 1. Embed the query (one text, one call).
//! 2. Query both channels concurrently: `topk_semantic` vector hits and
//!    `topk_keyword` full-text hits.
//! 3. Score keyword hits with [`keyword_score`].
//! 4. Min-max normalize each channel against its own hits only.
//! 5. Union-merge by document id: a document missing from a channel gets
//!    `0.0` for it.
//! 6. Fuse: `score = α × semantic + (1 − α) × keyword`.
//! 7. Stable sort by fused score, descending. Ties keep merge order:
//!    semantic hits in channel order, then keyword-only hits.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::{embed_query, Embedder};
use crate::error::DbNinjaError;
use crate::index::{KeywordIndex, SemanticIndex};
use crate::models::{FusedResult, RetrievalHit};
use crate::ranking::{fuse_scores, keyword_score, min_max_normalize, DEFAULT_ALPHA};

/// What to do when exactly one retrieval channel fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFailurePolicy {
    /// Propagate the failure and abort the retrieval.
    #[default]
    Abort,
    /// Treat the failed channel as empty and fuse the other one alone.
    Degrade,
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Weight for semantic vs keyword: `fused = α*semantic + (1-α)*keyword`.
    pub alpha: f64,
    /// Number of semantic hits to fetch.
    pub topk_semantic: usize,
    /// Number of keyword hits to fetch.
    pub topk_keyword: usize,
    pub channel_failure: ChannelFailurePolicy,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            topk_semantic: 30,
            topk_keyword: 30,
            channel_failure: ChannelFailurePolicy::Abort,
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> Result<(), DbNinjaError> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(DbNinjaError::InvalidParams {
                reason: format!("alpha must be in [0.0, 1.0], got {}", self.alpha),
            });
        }
        Ok(())
    }
}

/// Semantic + keyword retriever with score fusion.
///
/// Holds only immutable configuration and shared collaborators, so one
/// instance can serve concurrent requests.
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    semantic: Arc<dyn SemanticIndex>,
    keyword: Arc<dyn KeywordIndex>,
    params: RetrievalParams,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        semantic: Arc<dyn SemanticIndex>,
        keyword: Arc<dyn KeywordIndex>,
        params: RetrievalParams,
    ) -> Result<Self, DbNinjaError> {
        params.validate()?;
        Ok(Self {
            embedder,
            semantic,
            keyword,
            params,
        })
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Rank schema documents for `query`, best first.
    ///
    /// An embedding failure always fails the call. A single channel failure
    /// is handled per [`ChannelFailurePolicy`]; both channels failing is
    /// always an error.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<FusedResult>, DbNinjaError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(|e| DbNinjaError::transport("embedder", e))?;

        let (semantic, keyword) = futures::future::join(
            self.semantic
                .semantic_search(&vector, self.params.topk_semantic),
            self.keyword.keyword_search(query, self.params.topk_keyword),
        )
        .await;

        let (semantic_hits, keyword_docs) = match (semantic, keyword) {
            (Ok(s), Ok(k)) => (s, k),
            (Err(s), Err(k)) => {
                return Err(DbNinjaError::transport(
                    "semantic and keyword index",
                    anyhow::anyhow!("semantic: {:#}; keyword: {:#}", s, k),
                ))
            }
            (Err(e), Ok(k)) => match self.params.channel_failure {
                ChannelFailurePolicy::Abort => {
                    return Err(DbNinjaError::transport("semantic index", e))
                }
                ChannelFailurePolicy::Degrade => {
                    warn!(error = %format!("{:#}", e), "semantic channel failed; fusing keyword hits only");
                    (Vec::new(), k)
                }
            },
            (Ok(s), Err(e)) => match self.params.channel_failure {
                ChannelFailurePolicy::Abort => {
                    return Err(DbNinjaError::transport("keyword index", e))
                }
                ChannelFailurePolicy::Degrade => {
                    warn!(error = %format!("{:#}", e), "keyword channel failed; fusing semantic hits only");
                    (s, Vec::new())
                }
            },
        };

        let keyword_hits: Vec<RetrievalHit> = keyword_docs
            .into_iter()
            .map(|doc| {
                let score = keyword_score(query, &doc.doc_text, doc.popularity);
                RetrievalHit::new(doc, score)
            })
            .collect();

        debug!(
            semantic_hits = semantic_hits.len(),
            keyword_hits = keyword_hits.len(),
            "retrieval channels joined"
        );

        Ok(fuse_channels(semantic_hits, keyword_hits, self.params.alpha))
    }
}

/// Merge two channels' raw hits into one fused ranking.
///
/// Exactly one [`FusedResult`] is produced per distinct document id seen
/// in either list. Within a channel, a repeated id keeps its higher raw
/// score (at the position of its first occurrence) before normalization.
pub fn fuse_channels(
    semantic: Vec<RetrievalHit>,
    keyword: Vec<RetrievalHit>,
    alpha: f64,
) -> Vec<FusedResult> {
    let semantic = dedup_keep_max(semantic);
    let keyword = dedup_keep_max(keyword);

    let sem_scores: Vec<f64> = semantic.iter().map(|h| h.raw_score).collect();
    let kw_scores: Vec<f64> = keyword.iter().map(|h| h.raw_score).collect();
    let sem_norm = min_max_normalize(&sem_scores);
    let kw_norm = min_max_normalize(&kw_scores);

    let mut merged: Vec<FusedResult> = Vec::with_capacity(semantic.len() + keyword.len());
    let mut position: HashMap<String, usize> = HashMap::new();

    for (hit, norm) in semantic.into_iter().zip(sem_norm) {
        position.insert(hit.doc.id.clone(), merged.len());
        merged.push(FusedResult {
            semantic_score: norm,
            keyword_score: 0.0,
            score: 0.0,
            doc: hit.doc,
        });
    }

    for (hit, norm) in keyword.into_iter().zip(kw_norm) {
        match position.get(hit.id()) {
            Some(&i) => merged[i].keyword_score = norm,
            None => {
                position.insert(hit.doc.id.clone(), merged.len());
                merged.push(FusedResult {
                    semantic_score: 0.0,
                    keyword_score: norm,
                    score: 0.0,
                    doc: hit.doc,
                });
            }
        }
    }

    for r in &mut merged {
        r.score = fuse_scores(r.semantic_score, r.keyword_score, alpha);
    }

    // `sort_by` is stable: equal scores keep merge order.
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    merged
}

fn dedup_keep_max(hits: Vec<RetrievalHit>) -> Vec<RetrievalHit> {
    let mut out: Vec<RetrievalHit> = Vec::with_capacity(hits.len());
    let mut seen: HashMap<String, usize> = HashMap::new();
    for hit in hits {
        match seen.get(hit.id()) {
            Some(&i) => {
                if hit.raw_score > out[i].raw_score {
                    out[i].raw_score = hit.raw_score;
                }
            }
            None => {
                seen.insert(hit.doc.id.clone(), out.len());
                out.push(hit);
            }
        }
    }
    out
}
