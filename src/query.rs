//! Pipeline wiring and answer shaping shared by the CLI and the HTTP server.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use dbninja_core::generation::LoopState;
use dbninja_core::models::{FusedResult, GenerationAttempt};
use dbninja_core::pipeline::{Pipeline, QueryAnswer};
use dbninja_core::retriever::HybridRetriever;

use crate::config::Config;
use crate::db;
use crate::embedding::HttpEmbedder;
use crate::llm::{LlmClient, LlmSqlGenerator};
use crate::qdrant::QdrantIndex;
use crate::validator::ExplainValidator;

/// Build the production pipeline: gateway embedder, Qdrant for both
/// channels, LLM generator and an `EXPLAIN` validator on the target database.
pub async fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let embedder = Arc::new(HttpEmbedder::new(&config.api)?);
    let index = Arc::new(QdrantIndex::new(&config.qdrant)?);
    let retriever = HybridRetriever::new(
        embedder,
        index.clone(),
        index,
        config.retrieval_params(),
    )?;

    let generator = Arc::new(LlmSqlGenerator::new(LlmClient::new(&config.api)?));
    let validator = Arc::new(ExplainValidator::new(db::connect(&config.target_db).await?));

    Ok(Pipeline::new(
        retriever,
        generator,
        validator,
        config.generation_params(),
    ))
}

/// A ranked candidate as shown to callers, scores rounded to 4 decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateView {
    pub id: String,
    pub title: String,
    pub object_type: &'static str,
    pub table: Option<String>,
    pub column: Option<String>,
    pub score: f64,
    pub sem: f64,
    pub kw: f64,
}

impl From<&FusedResult> for CandidateView {
    fn from(r: &FusedResult) -> Self {
        Self {
            id: r.doc.id.clone(),
            title: r.doc.title.clone(),
            object_type: r.doc.kind().as_str(),
            table: r.doc.table_name().map(str::to_string),
            column: r.doc.column_name().map(str::to_string),
            score: round4(r.score),
            sem: round4(r.semantic_score),
            kw: round4(r.keyword_score),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub candidates: Vec<CandidateView>,
    pub sql: String,
    pub state: LoopState,
    pub attempts: Vec<GenerationAttempt>,
}

impl From<QueryAnswer> for QueryResponse {
    fn from(answer: QueryAnswer) -> Self {
        Self {
            candidates: answer.candidates.iter().map(CandidateView::from).collect(),
            sql: answer.sql,
            state: answer.state,
            attempts: answer.attempts,
        }
    }
}

pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Print a ranked candidate list as a fixed-width table.
pub fn print_candidates(candidates: &[CandidateView]) {
    if candidates.is_empty() {
        println!("No candidates.");
        return;
    }
    println!(
        "{:>3}  {:>6}  {:>6}  {:>6}  {:<8}  title",
        "#", "score", "sem", "kw", "type"
    );
    for (i, c) in candidates.iter().enumerate() {
        println!(
            "{:>3}  {:>6.4}  {:>6.4}  {:>6.4}  {:<8}  {}",
            i + 1,
            c.score,
            c.sem,
            c.kw,
            c.object_type,
            c.title
        );
    }
}

/// `dbninja query`: answer a question and print the SQL (or the full JSON answer).
pub async fn run_query(
    config: &Config,
    question: &str,
    dialect: Option<&str>,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let dialect = dialect.unwrap_or(config.generation.dialect.as_str());
    let top_k = top_k.unwrap_or(config.retrieval.final_topk);

    let response = QueryResponse::from(pipeline.answer(question, dialect, top_k).await?);

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    print_candidates(&response.candidates);
    println!();
    if response.state == LoopState::Exhausted {
        println!(
            "-- not validated: rejected after {} attempt(s)",
            response.attempts.len()
        );
    }
    println!("{}", response.sql);
    Ok(())
}

/// `dbninja retrieve`: rank schema documents for a query without generating SQL.
pub async fn run_retrieve(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let embedder = Arc::new(HttpEmbedder::new(&config.api)?);
    let index = Arc::new(QdrantIndex::new(&config.qdrant)?);
    let retriever = HybridRetriever::new(embedder, index.clone(), index, config.retrieval_params())?;

    let mut results = retriever.retrieve(query).await?;
    results.truncate(limit.unwrap_or(config.retrieval.final_topk));

    let views: Vec<CandidateView> = results.iter().map(CandidateView::from).collect();
    print_candidates(&views);
    Ok(())
}
