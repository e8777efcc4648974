//! Question → SQL pipeline: retrieval, example selection, generation loop.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::DbNinjaError;
use crate::generation::{
    GenerationLoop, GenerationParams, GenerationRequest, LoopState, SqlGenerator, SqlValidator,
};
use crate::models::{DocKind, FusedResult, GenerationAttempt, IndexedDoc};
use crate::retriever::HybridRetriever;

/// Worked examples passed to the generator per question.
pub const MAX_EXAMPLES: usize = 3;

/// Everything the caller gets back for one question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    /// Ranked candidates, capped at top-K, with per-channel and fused scores.
    pub candidates: Vec<FusedResult>,
    pub sql: String,
    pub state: LoopState,
    pub attempts: Vec<GenerationAttempt>,
}

pub struct Pipeline {
    retriever: HybridRetriever,
    generator: Arc<dyn SqlGenerator>,
    validator: Arc<dyn SqlValidator>,
    generation: GenerationParams,
}

impl Pipeline {
    pub fn new(
        retriever: HybridRetriever,
        generator: Arc<dyn SqlGenerator>,
        validator: Arc<dyn SqlValidator>,
        generation: GenerationParams,
    ) -> Self {
        Self {
            retriever,
            generator,
            validator,
            generation,
        }
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    /// Answer `question` in `dialect`, using the `top_k` best candidates as context.
    pub async fn answer(
        &self,
        question: &str,
        dialect: &str,
        top_k: usize,
    ) -> Result<QueryAnswer, DbNinjaError> {
        let mut candidates = self.retriever.retrieve(question).await?;
        candidates.truncate(top_k);
        let examples = select_examples(&candidates);

        info!(
            candidates = candidates.len(),
            examples = examples.len(),
            dialect,
            "generating sql"
        );

        let req = GenerationRequest {
            question,
            dialect,
            context: &candidates,
            examples: &examples,
        };
        let outcome = GenerationLoop::new(
            self.generator.as_ref(),
            self.validator.as_ref(),
            self.generation.clone(),
        )
        .run(&req)
        .await?;

        Ok(QueryAnswer {
            candidates,
            sql: outcome.sql,
            state: outcome.state,
            attempts: outcome.attempts,
        })
    }
}

/// The first [`MAX_EXAMPLES`] example documents in rank order.
pub fn select_examples(ranked: &[FusedResult]) -> Vec<IndexedDoc> {
    ranked
        .iter()
        .filter(|r| r.doc.kind() == DocKind::Example)
        .take(MAX_EXAMPLES)
        .map(|r| r.doc.clone())
        .collect()
}
