//! TOML configuration.
//!
//! One immutable [`Config`] value is loaded at startup and handed to every
//! component constructor. Secrets are never read from the file: the
//! `*_env` keys name environment variables that hold them.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use dbninja_core::generation::{ExhaustionPolicy, GenerationParams};
use dbninja_core::retriever::{ChannelFailurePolicy, RetrievalParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    pub api: ApiConfig,
    pub qdrant: QdrantConfig,
    pub target_db: TargetDbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_topk")]
    pub topk_semantic: usize,
    #[serde(default = "default_topk")]
    pub topk_keyword: usize,
    #[serde(default = "default_final_topk")]
    pub final_topk: usize,
    #[serde(default)]
    pub channel_failure: ChannelFailurePolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            topk_semantic: default_topk(),
            topk_keyword: default_topk(),
            final_topk: default_final_topk(),
            channel_failure: ChannelFailurePolicy::default(),
        }
    }
}

fn default_alpha() -> f64 {
    0.7
}
fn default_topk() -> usize {
    30
}
fn default_final_topk() -> usize {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_dialect")]
    pub dialect: String,
    #[serde(default = "default_max_corrections")]
    pub max_corrections: usize,
    #[serde(default)]
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            max_corrections: default_max_corrections(),
            on_exhausted: ExhaustionPolicy::default(),
        }
    }
}

fn default_dialect() -> String {
    "postgres".to_string()
}
fn default_max_corrections() -> usize {
    1
}

/// Embedding + LLM gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embeddings_path")]
    pub embeddings_path: String,
    #[serde(default = "default_predict_path")]
    pub predict_path: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_key_env() -> String {
    "DBNINJA_API_KEY".to_string()
}
fn default_embeddings_path() -> String {
    "/v1/embeddings".to_string()
}
fn default_predict_path() -> String {
    "/predict".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}

impl ApiConfig {
    pub fn embeddings_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.embeddings_path)
    }

    pub fn predict_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.predict_path)
    }

    /// API key from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    pub dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "nlp_sql_schema".to_string()
}

impl QdrantConfig {
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetDbConfig {
    /// sqlx connection URL (`mysql://`, `postgres://`, `sqlite:`).
    pub url: String,
    /// Schema to introspect during ingestion.
    pub schema: String,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_name() -> String {
    "db".to_string()
}
fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_popularity")]
    pub popularity: f64,
    /// Table descriptions keyed by upper-cased table name.
    #[serde(default)]
    pub table_descriptions: BTreeMap<String, String>,
    /// Column descriptions keyed by upper-cased table name, then column name.
    #[serde(default)]
    pub descriptions: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub examples: Vec<ExampleConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            popularity: default_popularity(),
            table_descriptions: BTreeMap::new(),
            descriptions: BTreeMap::new(),
            examples: Vec::new(),
        }
    }
}

fn default_batch_size() -> usize {
    8
}
fn default_popularity() -> f64 {
    0.5
}

/// A worked question → SQL pair indexed as an example document.
#[derive(Debug, Deserialize, Clone)]
pub struct ExampleConfig {
    pub question: String,
    pub sql: String,
    #[serde(default)]
    pub table: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            alpha: self.retrieval.alpha,
            topk_semantic: self.retrieval.topk_semantic,
            topk_keyword: self.retrieval.topk_keyword,
            channel_failure: self.retrieval.channel_failure,
        }
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_corrections: self.generation.max_corrections,
            on_exhausted: self.generation.on_exhausted,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.retrieval.alpha) {
        bail!("retrieval.alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.topk_semantic == 0 || config.retrieval.topk_keyword == 0 {
        bail!("retrieval.topk_semantic and retrieval.topk_keyword must be >= 1");
    }
    if config.retrieval.final_topk == 0 {
        bail!("retrieval.final_topk must be >= 1");
    }

    if config.generation.dialect.trim().is_empty() {
        bail!("generation.dialect must not be empty");
    }

    if config.qdrant.dims == 0 {
        bail!("qdrant.dims must be > 0");
    }
    if config.qdrant.collection.trim().is_empty() {
        bail!("qdrant.collection must not be empty");
    }

    if config.ingest.batch_size == 0 {
        bail!("ingest.batch_size must be > 0");
    }
    if !(0.0..=1.0).contains(&config.ingest.popularity) {
        bail!("ingest.popularity must be in [0.0, 1.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[api]
base_url = "http://gateway.local/qwen/"

[qdrant]
dims = 1536

[target_db]
url = "mysql://root@localhost:3306/nlpSqlTest"
schema = "nlpSqlTest"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg: Config = toml::from_str(MINIMAL).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.retrieval.alpha, 0.7);
        assert_eq!(cfg.retrieval.topk_semantic, 30);
        assert_eq!(cfg.retrieval.topk_keyword, 30);
        assert_eq!(cfg.retrieval.final_topk, 12);
        assert_eq!(cfg.retrieval.channel_failure, ChannelFailurePolicy::Abort);
        assert_eq!(cfg.generation.max_corrections, 1);
        assert_eq!(cfg.generation.on_exhausted, ExhaustionPolicy::BestEffort);
        assert_eq!(cfg.qdrant.collection, "nlp_sql_schema");
        assert_eq!(cfg.ingest.batch_size, 8);
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
        assert_eq!(
            cfg.api.embeddings_url(),
            "http://gateway.local/qwen/v1/embeddings"
        );
        assert_eq!(cfg.api.predict_url(), "http://gateway.local/qwen/predict");
    }

    #[test]
    fn test_policies_and_ingest_sections_parse() {
        let content = format!(
            r#"{}
[retrieval]
alpha = 0.5
channel_failure = "degrade"

[generation]
dialect = "mysql"
max_corrections = 0
on_exhausted = "fail"

[ingest.table_descriptions]
TRADES = "Executed client trades"

[ingest.descriptions.TRADES]
"Trade ID" = "An internally generated identifier for this trade"

[[ingest.examples]]
question = "How many trades are active?"
sql = "SELECT COUNT(*) FROM TRADES WHERE `Trade Status` = 'A'"
table = "TRADES"
"#,
            MINIMAL
        );
        let cfg: Config = toml::from_str(&content).unwrap();
        validate(&cfg).unwrap();

        let rp = cfg.retrieval_params();
        assert_eq!(rp.alpha, 0.5);
        assert_eq!(rp.channel_failure, ChannelFailurePolicy::Degrade);

        let gp = cfg.generation_params();
        assert_eq!(gp.max_corrections, 0);
        assert_eq!(gp.on_exhausted, ExhaustionPolicy::Fail);

        assert_eq!(
            cfg.ingest.descriptions["TRADES"]["Trade ID"],
            "An internally generated identifier for this trade"
        );
        assert_eq!(cfg.ingest.table_descriptions["TRADES"], "Executed client trades");
        assert_eq!(cfg.ingest.examples.len(), 1);
        assert_eq!(cfg.ingest.examples[0].table.as_deref(), Some("TRADES"));
    }

    #[test]
    fn test_load_config_rejects_bad_alpha() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}\n[retrieval]\nalpha = 1.2\n", MINIMAL).unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("retrieval.alpha"), "got: {}", err);
    }

    #[test]
    fn test_load_config_rejects_zero_dims() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content = MINIMAL.replace("dims = 1536", "dims = 0");
        write!(file, "{}", content).unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("qdrant.dims"), "got: {}", err);
    }

    #[test]
    fn test_example_config_is_valid() {
        let cfg: Config = toml::from_str(include_str!("../config/dbninja.example.toml")).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.generation.dialect, "mysql");
        assert_eq!(cfg.ingest.descriptions["TRADES"].len(), 8);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/dbninja.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_unknown_policy_is_parse_error() {
        let content = format!("{}\n[retrieval]\nchannel_failure = \"ignore\"\n", MINIMAL);
        assert!(toml::from_str::<Config>(&content).is_err());
    }
}
