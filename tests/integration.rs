use std::collections::VecDeque;
use std::net::SocketAddr;
use std::process::Command;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::any::AnyPoolOptions;
use tokio::net::TcpListener;

use dbninja::server::{serve, ServerOptions};
use dbninja::validator::ExplainValidator;
use dbninja_core::embedding::Embedder;
use dbninja_core::generation::{
    ExhaustionPolicy, GenerationParams, GenerationRequest, SqlGenerator,
};
use dbninja_core::index::memory::InMemoryIndex;
use dbninja_core::models::{ColumnFields, DocBody, ExampleFields, IndexedDoc, TableFields};
use dbninja_core::pipeline::Pipeline;
use dbninja_core::retriever::{HybridRetriever, RetrievalParams};

const VOCAB: &[&str] = &["trade", "status", "price", "quote", "instrument", "active"];

/// Term-count vectors over a fixed vocabulary.
struct VocabEmbedder;

fn vocab_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    VOCAB
        .iter()
        .map(|term| lower.matches(term).count() as f32)
        .collect()
}

#[async_trait]
impl Embedder for VocabEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| vocab_vector(t)).collect())
    }
}

struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding gateway error 503 Service Unavailable")
    }
}

/// Replays scripted SQL for drafts and corrections alike.
struct ScriptedGenerator {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedGenerator {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn next(&self) -> Result<String> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted reply left"))
    }
}

#[async_trait]
impl SqlGenerator for ScriptedGenerator {
    async fn generate(&self, _req: &GenerationRequest<'_>) -> Result<String> {
        self.next()
    }

    async fn generate_with_correction(
        &self,
        _req: &GenerationRequest<'_>,
        _prior_error: &str,
    ) -> Result<String> {
        self.next()
    }
}

fn schema_docs() -> Vec<IndexedDoc> {
    let table = IndexedDoc {
        id: "t-trades".into(),
        title: "s.trades".into(),
        doc_text: "TABLE s.trades\nExecuted trades with price and status".into(),
        keywords: vec!["s".into(), "trades".into()],
        popularity: 0.5,
        last_updated: None,
        body: DocBody::Table(TableFields {
            db_name: "db".into(),
            schema_name: "s".into(),
            table_name: "trades".into(),
            row_count: Some(2),
        }),
    };
    let column = |name: &str, text: &str| IndexedDoc {
        id: format!("c-{}", name),
        title: format!("s.trades.{}", name),
        doc_text: text.to_string(),
        keywords: vec![name.to_string()],
        popularity: 0.5,
        last_updated: None,
        body: DocBody::Column(ColumnFields {
            db_name: "db".into(),
            schema_name: "s".into(),
            table_name: "trades".into(),
            column_name: name.to_string(),
            data_type: "TEXT".into(),
            nullable: true,
        }),
    };
    let example = IndexedDoc {
        id: "ex-active".into(),
        title: "How many trades are active?".into(),
        doc_text: "EXAMPLE\nQuestion: How many trades are active?\nSQL:\nSELECT COUNT(*) FROM trades WHERE status = 'A'".into(),
        keywords: vec![],
        popularity: 0.5,
        last_updated: None,
        body: DocBody::Example(ExampleFields {
            question: "How many trades are active?".into(),
            sql: "SELECT COUNT(*) FROM trades WHERE status = 'A'".into(),
            schema_name: Some("s".into()),
            table_name: Some("trades".into()),
        }),
    };
    vec![
        table,
        column("status", "COLUMN s.trades.status\nType: TEXT NULLABLE\nTrade status A=Active"),
        column("price", "COLUMN s.trades.price\nType: REAL NULLABLE\nExecuted trade price"),
        example,
    ]
}

async fn test_validator() -> ExplainValidator {
    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::query("CREATE TABLE trades (id INTEGER PRIMARY KEY, status TEXT, price REAL)")
        .execute(&pool)
        .await
        .unwrap();
    ExplainValidator::new(pool)
}

async fn test_pipeline(
    embedder: Arc<dyn Embedder>,
    replies: &[&str],
    generation: GenerationParams,
) -> Arc<Pipeline> {
    let index = Arc::new(InMemoryIndex::new());
    for doc in schema_docs() {
        let vector = vocab_vector(&doc.doc_text);
        index.upsert(doc, vector);
    }
    let retriever =
        HybridRetriever::new(embedder, index.clone(), index, RetrievalParams::default()).unwrap();
    Arc::new(Pipeline::new(
        retriever,
        Arc::new(ScriptedGenerator::new(replies)),
        Arc::new(test_validator().await),
        generation,
    ))
}

/// Serve `pipeline` on a free local port and return its address.
async fn spawn_server(pipeline: Arc<Pipeline>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let options = ServerOptions {
        dialect: "sqlite".into(),
        top_k: 12,
        ingest: None,
    };
    tokio::spawn(async move {
        serve(listener, pipeline, options).await.unwrap();
    });
    addr
}

async fn post_query(addr: SocketAddr, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("http://{}/query", addr))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn test_health() {
    let addr = spawn_server(test_pipeline(Arc::new(VocabEmbedder), &[], Default::default()).await).await;
    let body: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_query_corrects_rejected_sql() {
    let pipeline = test_pipeline(
        Arc::new(VocabEmbedder),
        &[
            "SELECT COUNT(*) FROM trades WHERE statuz = 'A'",
            "SELECT COUNT(*) FROM trades WHERE status = 'A'",
        ],
        GenerationParams::default(),
    )
    .await;
    let addr = spawn_server(pipeline).await;

    let (status, body) = post_query(addr, json!({"question": "active trade status"})).await;
    assert_eq!(status, 200, "body: {}", body);
    assert_eq!(body["state"], "accepted");
    assert_eq!(body["sql"], "SELECT COUNT(*) FROM trades WHERE status = 'A'");

    let attempts = body["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0]["outcome"]["accepted"], false);
    assert!(attempts[0]["outcome"]["diagnostic"]
        .as_str()
        .unwrap()
        .contains("statuz"));
    assert_eq!(attempts[1]["prior_error"], attempts[0]["outcome"]["diagnostic"]);

    let candidates = body["candidates"].as_array().unwrap();
    assert!(!candidates.is_empty());
    let scores: Vec<f64> = candidates
        .iter()
        .map(|c| c["score"].as_f64().unwrap())
        .collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]), "scores: {:?}", scores);
    for c in candidates {
        for key in ["score", "sem", "kw"] {
            let v = c[key].as_f64().unwrap();
            assert!((0.0..=1.0).contains(&v));
            assert!(((v * 10_000.0).round() - v * 10_000.0).abs() < 1e-6);
        }
    }
}

#[tokio::test]
async fn test_query_exhausted_best_effort() {
    let pipeline = test_pipeline(
        Arc::new(VocabEmbedder),
        &["SELECT nope FROM trades", "SELECT still_nope FROM trades"],
        GenerationParams::default(),
    )
    .await;
    let addr = spawn_server(pipeline).await;

    let (status, body) = post_query(addr, json!({"question": "trade price", "top_k": 2})).await;
    assert_eq!(status, 200);
    assert_eq!(body["state"], "exhausted");
    assert_eq!(body["sql"], "SELECT still_nope FROM trades");
    assert!(body["candidates"].as_array().unwrap().len() <= 2);
}

#[tokio::test]
async fn test_query_exhausted_fail_policy_is_422() {
    let params = GenerationParams {
        max_corrections: 0,
        on_exhausted: ExhaustionPolicy::Fail,
    };
    let pipeline = test_pipeline(Arc::new(VocabEmbedder), &["SELECT nope FROM trades"], params).await;
    let addr = spawn_server(pipeline).await;

    let (status, body) = post_query(addr, json!({"question": "trade price"})).await;
    assert_eq!(status, 422);
    assert_eq!(body["error"]["code"], "exhausted");
    assert_eq!(body["error"]["sql"], "SELECT nope FROM trades");
}

#[tokio::test]
async fn test_empty_question_is_bad_request() {
    let addr = spawn_server(test_pipeline(Arc::new(VocabEmbedder), &[], Default::default()).await).await;
    let (status, body) = post_query(addr, json!({"question": "   "})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "question must not be empty");
    assert!(body["error"].get("sql").is_none());
}

#[tokio::test]
async fn test_embedder_outage_is_upstream_error() {
    let addr = spawn_server(test_pipeline(Arc::new(DownEmbedder), &[], Default::default()).await).await;
    let (status, body) = post_query(addr, json!({"question": "trade status"})).await;
    assert_eq!(status, 502);
    assert_eq!(body["error"]["code"], "upstream_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn test_ingest_without_config_is_internal() {
    let addr = spawn_server(test_pipeline(Arc::new(VocabEmbedder), &[], Default::default()).await).await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/ingest", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "internal");
}

#[test]
fn test_cli_missing_config_exits_nonzero() {
    let output = Command::new(env!("CARGO_BIN_EXE_dbninja"))
        .args(["--config", "/nonexistent/dbninja.toml", "retrieve", "trades"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn test_cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_dbninja"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["ingest", "query", "retrieve", "serve"] {
        assert!(stdout.contains(cmd), "missing {} in: {}", cmd, stdout);
    }
}
